// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Metric families for `networking.istio.io` VirtualServices
//!
//! Every family carries the plain resource name plus a `namespace` label.
//! Rows below `http[]` / `tcp[]` carry the position of their route block in
//! `route`, so two blocks routing to the same destination stay distinct series.

use super::schema::{
    FamilySchema, KindSchema, MetricFamily, PairStyle, Scope, Source, Step,
};

pub const INFO: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_info",
        help: "Information about Pilot VirtualServices",
        labels: &["virtual_service", "namespace"],
    },
    walk: &[],
    sources: &[Source::Name, Source::Namespace],
};

pub const HOST: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_host",
        help: "Information about Hosts in Pilot VirtualServices",
        labels: &["virtual_service", "namespace", "host"],
    },
    walk: &[Step::FanOut("hosts")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Field(Scope::Current, ""),
    ],
};

pub const GATEWAY: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_gateway",
        help: "Information about Gateways in Pilot VirtualServices",
        labels: &["virtual_service", "namespace", "gateway"],
    },
    walk: &[Step::FanOut("gateways")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Field(Scope::Current, ""),
    ],
};

pub const HTTP_MATCH: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_http_match_info",
        help: "Information about Pilot VirtualServices Http Match Info",
        labels: &[
            "virtual_service",
            "namespace",
            "route",
            "uri_exact",
            "uri_prefix",
            "uri_regex",
            "scheme_exact",
            "scheme_prefix",
            "scheme_regex",
            "method_exact",
            "method_prefix",
            "method_regex",
            "authority_exact",
            "authority_prefix",
            "authority_regex",
            "headers",
            "port",
            "source_labels",
            "gateways",
        ],
    },
    walk: &[Step::FanOut("http"), Step::FanOut("match")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Index(Scope::Up(1)),
        Source::Field(Scope::Current, "uri.exact"),
        Source::Field(Scope::Current, "uri.prefix"),
        Source::Field(Scope::Current, "uri.regex"),
        Source::Field(Scope::Current, "scheme.exact"),
        Source::Field(Scope::Current, "scheme.prefix"),
        Source::Field(Scope::Current, "scheme.regex"),
        Source::Field(Scope::Current, "method.exact"),
        Source::Field(Scope::Current, "method.prefix"),
        Source::Field(Scope::Current, "method.regex"),
        Source::Field(Scope::Current, "authority.exact"),
        Source::Field(Scope::Current, "authority.prefix"),
        Source::Field(Scope::Current, "authority.regex"),
        Source::Pairs(Scope::Current, "headers", PairStyle::HeaderMatch),
        Source::Field(Scope::Current, "port"),
        Source::Pairs(Scope::Current, "sourceLabels", PairStyle::KeyValue),
        Source::Join(Scope::Current, "gateways"),
    ],
};

pub const HTTP_ROUTE: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_http_route_info",
        help: "Information about Pilot VirtualServices Http Route Info",
        labels: &[
            "virtual_service",
            "namespace",
            "route",
            "destination_host",
            "destination_subset",
            "destination_port_name",
            "destination_port_number",
            "weight",
        ],
    },
    walk: &[Step::FanOut("http"), Step::FanOut("route")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Index(Scope::Up(1)),
        Source::Field(Scope::Current, "destination.host"),
        Source::Field(Scope::Current, "destination.subset"),
        Source::Field(Scope::Current, "destination.port.name"),
        Source::Field(Scope::Current, "destination.port.number"),
        Source::Field(Scope::Current, "weight"),
    ],
};

pub const HTTP_ROUTE_SETTINGS: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_http_route_settings",
        help: "Information about Pilot VirtualServices Http Route Settings",
        labels: &[
            "virtual_service",
            "namespace",
            "route",
            "timeout",
            "retries_attempts",
            "retries_per_try_timeout",
            "redirect_uri",
            "redirect_authority",
            "rewrite_uri",
            "rewrite_authority",
            "mirror_host",
            "mirror_subset",
            "websocket_upgrade",
        ],
    },
    walk: &[Step::FanOut("http")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Index(Scope::Current),
        Source::Duration(Scope::Current, "timeout"),
        Source::Field(Scope::Current, "retries.attempts"),
        Source::Duration(Scope::Current, "retries.perTryTimeout"),
        Source::Field(Scope::Current, "redirect.uri"),
        Source::Field(Scope::Current, "redirect.authority"),
        Source::Field(Scope::Current, "rewrite.uri"),
        Source::Field(Scope::Current, "rewrite.authority"),
        Source::Field(Scope::Current, "mirror.host"),
        Source::Field(Scope::Current, "mirror.subset"),
        Source::Field(Scope::Current, "websocketUpgrade"),
    ],
};

pub const TCP_ROUTE: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_virtual_service_tcp_route_info",
        help: "Information about Pilot VirtualServices Tcp Route Info",
        labels: &[
            "virtual_service",
            "namespace",
            "route",
            "destination_host",
            "destination_subset",
            "destination_port_name",
            "destination_port_number",
            "weight",
        ],
    },
    walk: &[Step::FanOut("tcp"), Step::FanOut("route")],
    sources: &[
        Source::Name,
        Source::Namespace,
        Source::Index(Scope::Up(1)),
        Source::Field(Scope::Current, "destination.host"),
        Source::Field(Scope::Current, "destination.subset"),
        Source::Field(Scope::Current, "destination.port.name"),
        Source::Field(Scope::Current, "destination.port.number"),
        Source::Field(Scope::Current, "weight"),
    ],
};

pub const SCHEMA: KindSchema = KindSchema {
    resource: "virtual_service",
    families: &[
        INFO,
        HOST,
        GATEWAY,
        HTTP_MATCH,
        HTTP_ROUTE,
        HTTP_ROUTE_SETTINGS,
        TCP_ROUTE,
    ],
    derived: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::MetricRow;
    use crate::kubernetes::WatchedResource;
    use serde_json::{Value, json};

    fn rows_of(spec: Value) -> Vec<MetricRow> {
        SCHEMA.extract(&WatchedResource::new("reviews", Some("default"), spec))
    }

    fn family<'a>(rows: &'a [MetricRow], name: &str) -> Vec<&'a MetricRow> {
        rows.iter().filter(|r| r.family == name).collect()
    }

    fn bookinfo() -> Value {
        json!({
            "hosts": ["reviews", "reviews.example.com"],
            "gateways": ["bookinfo-gateway", "mesh"],
            "http": [
                {
                    "match": [
                        {
                            "headers": {"end-user": {"exact": "jason"}},
                            "sourceLabels": {"app": "productpage"}
                        },
                        {"uri": {"prefix": "/v2"}, "port": 9080}
                    ],
                    "route": [
                        {"destination": {"host": "reviews", "subset": "v2"}}
                    ],
                    "timeout": "10s",
                    "retries": {"attempts": 3, "perTryTimeout": "2s"}
                },
                {
                    "route": [
                        {"destination": {"host": "reviews", "subset": "v1"}, "weight": 75},
                        {"destination": {"host": "reviews", "subset": "v3", "port": {"number": 9080}}, "weight": 25}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_info_only_for_empty_spec() {
        let rows = rows_of(json!({}));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].family, INFO.family.name);
        assert_eq!(rows[0].labels, vec!["reviews", "default"]);
    }

    #[test]
    fn test_hosts_and_gateways_fan_out() {
        let rows = rows_of(bookinfo());
        let hosts = family(&rows, HOST.family.name);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].labels, vec!["reviews", "default", "reviews.example.com"]);

        let gateways = family(&rows, GATEWAY.family.name);
        assert_eq!(gateways.len(), 2);
        assert_eq!(gateways[0].labels[2], "bookinfo-gateway");
        assert_eq!(gateways[1].labels[2], "mesh");
    }

    #[test]
    fn test_http_match_rows() {
        let rows = rows_of(bookinfo());
        let matches = family(&rows, HTTP_MATCH.family.name);
        assert_eq!(matches.len(), 2);

        let first = &matches[0].labels;
        assert_eq!(first[2], "0");
        assert_eq!(first[15], "{header:end-user,value:jason,,}");
        assert_eq!(first[16], "");
        assert_eq!(first[17], "{key:app,value:productpage}");

        let second = &matches[1].labels;
        assert_eq!(second[4], "/v2");
        assert_eq!(second[16], "9080");
        assert_eq!(second[15], "");
    }

    #[test]
    fn test_http_route_rows_keep_block_position() {
        let rows = rows_of(bookinfo());
        let routes = family(&rows, HTTP_ROUTE.family.name);
        assert_eq!(routes.len(), 3);
        assert_eq!(
            routes[0].labels,
            vec!["reviews", "default", "0", "reviews", "v2", "", "", ""]
        );
        assert_eq!(
            routes[1].labels,
            vec!["reviews", "default", "1", "reviews", "v1", "", "", "75"]
        );
        assert_eq!(
            routes[2].labels,
            vec!["reviews", "default", "1", "reviews", "v3", "", "9080", "25"]
        );
    }

    #[test]
    fn test_http_route_settings() {
        let rows = rows_of(bookinfo());
        let settings = family(&rows, HTTP_ROUTE_SETTINGS.family.name);
        assert_eq!(settings.len(), 2);
        assert_eq!(&settings[0].labels[2..6], ["0", "10s", "3", "2s"]);
        assert!(settings[1].labels[3..].iter().all(String::is_empty));
    }

    #[test]
    fn test_tcp_routes() {
        let rows = rows_of(json!({
            "hosts": ["mongo"],
            "tcp": [
                {"match": [{"port": 27017}], "route": [{"destination": {"host": "mongo.backup", "port": {"number": 5555}}}]}
            ]
        }));
        let tcp = family(&rows, TCP_ROUTE.family.name);
        assert_eq!(tcp.len(), 1);
        assert_eq!(
            tcp[0].labels,
            vec!["reviews", "default", "0", "mongo.backup", "", "", "5555", ""]
        );
        assert!(family(&rows, HTTP_ROUTE.family.name).is_empty());
    }
}

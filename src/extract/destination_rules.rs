// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Metric families for `networking.istio.io` DestinationRules

use super::schema::{
    FamilySchema, KindSchema, MetricFamily, PairStyle, Scope, Source, Step,
};

const LB_VARIANTS: &[(&str, &str)] = &[("consistentHash", "consistent_hash")];

pub const INFO: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_info",
        help: "Information about Pilot DestinationRules",
        labels: &["destination_rule", "namespace"],
    },
    walk: &[],
    sources: &[Source::Identity, Source::Namespace],
};

pub const HOST: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_host",
        help: "Information about Host in Pilot DestinationRules",
        labels: &["destination_rule", "host"],
    },
    walk: &[],
    sources: &[Source::Identity, Source::Field(Scope::Root, "host")],
};

pub const LOAD_BALANCER: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_traffic_policy_loadbalancer",
        help: "Information about LoadBalancer in Pilot DestinationRules",
        labels: &[
            "destination_rule",
            "lb_type",
            "lb_identifier",
            "consistent_hash_minimum_ring_size",
        ],
    },
    walk: &[Step::Section("trafficPolicy.loadBalancer")],
    sources: &[
        Source::Identity,
        Source::Variant(Scope::Current, "", LB_VARIANTS, "simple"),
        Source::FirstOf(
            Scope::Current,
            &[
                "consistentHash.httpHeaderName",
                "consistentHash.httpHeader",
                "simple",
            ],
        ),
        Source::Field(Scope::Current, "consistentHash.minimumRingSize"),
    ],
};

pub const CONNECTION_POOL: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_traffic_policy_connection_pool_settings",
        help: "Information about ConnectionPoolSettings in Pilot DestinationRules",
        labels: &[
            "destination_rule",
            "max_connections",
            "connect_timeout",
            "http1_max_pending_requests",
            "http2_max_requests",
            "max_requests_per_connection",
            "max_retries",
        ],
    },
    walk: &[Step::Section("trafficPolicy.connectionPool")],
    sources: &[
        Source::Identity,
        Source::Field(Scope::Current, "tcp.maxConnections"),
        Source::Duration(Scope::Current, "tcp.connectTimeout"),
        Source::Field(Scope::Current, "http.http1MaxPendingRequests"),
        Source::Field(Scope::Current, "http.http2MaxRequests"),
        Source::Field(Scope::Current, "http.maxRequestsPerConnection"),
        Source::Field(Scope::Current, "http.maxRetries"),
    ],
};

// Older resources nest the settings under `http`, newer ones are flat
pub const OUTLIER_DETECTION: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_traffic_policy_outlier_detection",
        help: "Information about OutlierDetection in Pilot DestinationRules",
        labels: &[
            "destination_rule",
            "consecutive_errors",
            "interval",
            "base_ejection_time",
            "max_ejection_percent",
        ],
    },
    walk: &[Step::Section("trafficPolicy.outlierDetection")],
    sources: &[
        Source::Identity,
        Source::FirstOf(Scope::Current, &["http.consecutiveErrors", "consecutiveErrors"]),
        Source::FirstDuration(Scope::Current, &["http.interval", "interval"]),
        Source::FirstDuration(
            Scope::Current,
            &["http.baseEjectionTime", "baseEjectionTime"],
        ),
        Source::FirstOf(
            Scope::Current,
            &["http.maxEjectionPercent", "maxEjectionPercent"],
        ),
    ],
};

pub const TLS: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_traffic_policy_tls_settings",
        help: "Information about TLS Settings of TrafficPolicy in Pilot DestinationRules",
        labels: &[
            "destination_rule",
            "mode",
            "client_certificate",
            "private_key",
            "ca_certificates",
            "subject_alt_names",
            "sni",
        ],
    },
    walk: &[Step::Section("trafficPolicy.tls")],
    sources: &[
        Source::Identity,
        Source::Field(Scope::Current, "mode"),
        Source::Field(Scope::Current, "clientCertificate"),
        Source::Field(Scope::Current, "privateKey"),
        Source::Field(Scope::Current, "caCertificates"),
        Source::Join(Scope::Current, "subjectAltNames"),
        Source::Field(Scope::Current, "sni"),
    ],
};

pub const PORT_LEVEL_SETTINGS: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_traffic_policy_port_level_settings",
        help: "Information about PortTrafficPolicy in Pilot DestinationRules",
        labels: &[
            "destination_rule",
            "port_name",
            "port_number",
            "lb_type",
            "lb_identifier",
            "consistent_hash_minimum_ring_size",
            "max_connections",
            "connect_timeout",
            "http1_max_pending_requests",
            "http2_max_requests",
            "max_requests_per_connection",
            "max_retries",
            "consecutive_errors",
            "interval",
            "base_ejection_time",
            "max_ejection_percent",
            "mode",
            "client_certificate",
            "private_key",
            "ca_certificates",
            "subject_alt_names",
            "sni",
        ],
    },
    walk: &[
        Step::Section("trafficPolicy"),
        Step::FanOut("portLevelSettings"),
    ],
    sources: &[
        Source::Identity,
        Source::Field(Scope::Current, "port.name"),
        Source::Field(Scope::Current, "port.number"),
        Source::Variant(Scope::Current, "loadBalancer", LB_VARIANTS, "simple"),
        Source::FirstOf(
            Scope::Current,
            &[
                "loadBalancer.consistentHash.httpHeaderName",
                "loadBalancer.consistentHash.httpHeader",
                "loadBalancer.simple",
            ],
        ),
        Source::Field(Scope::Current, "loadBalancer.consistentHash.minimumRingSize"),
        Source::Field(Scope::Current, "connectionPool.tcp.maxConnections"),
        Source::Duration(Scope::Current, "connectionPool.tcp.connectTimeout"),
        Source::Field(Scope::Current, "connectionPool.http.http1MaxPendingRequests"),
        Source::Field(Scope::Current, "connectionPool.http.http2MaxRequests"),
        Source::Field(Scope::Current, "connectionPool.http.maxRequestsPerConnection"),
        Source::Field(Scope::Current, "connectionPool.http.maxRetries"),
        Source::FirstOf(
            Scope::Current,
            &[
                "outlierDetection.http.consecutiveErrors",
                "outlierDetection.consecutiveErrors",
            ],
        ),
        Source::FirstDuration(
            Scope::Current,
            &["outlierDetection.http.interval", "outlierDetection.interval"],
        ),
        Source::FirstDuration(
            Scope::Current,
            &[
                "outlierDetection.http.baseEjectionTime",
                "outlierDetection.baseEjectionTime",
            ],
        ),
        Source::FirstOf(
            Scope::Current,
            &[
                "outlierDetection.http.maxEjectionPercent",
                "outlierDetection.maxEjectionPercent",
            ],
        ),
        Source::Field(Scope::Current, "tls.mode"),
        Source::Field(Scope::Current, "tls.clientCertificate"),
        Source::Field(Scope::Current, "tls.privateKey"),
        Source::Field(Scope::Current, "tls.caCertificates"),
        Source::Join(Scope::Current, "tls.subjectAltNames"),
        Source::Field(Scope::Current, "tls.sni"),
    ],
};

pub const SUBSET: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_pilot_destination_rule_subset",
        help: "Information about Subsets in Pilot DestinationRules",
        labels: &["destination_rule", "subset", "labels"],
    },
    walk: &[Step::FanOut("subsets")],
    sources: &[
        Source::Identity,
        Source::Field(Scope::Current, "name"),
        Source::Pairs(Scope::Current, "labels", PairStyle::KeyValue),
    ],
};

pub const SCHEMA: KindSchema = KindSchema {
    resource: "DestinationRule",
    families: &[
        INFO,
        HOST,
        LOAD_BALANCER,
        CONNECTION_POOL,
        OUTLIER_DETECTION,
        TLS,
        PORT_LEVEL_SETTINGS,
        SUBSET,
    ],
    derived: &[],
};

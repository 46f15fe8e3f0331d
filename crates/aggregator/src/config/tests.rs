// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::*;
use crate::codec::{SchemaRegistryConfig, ValueFormat};
use std::collections::HashMap;

const FULL_CONFIG: &str = r#"runtime:
  threads: 4
logging:
  level: debug
telemetry:
  url: http://localhost:4317
  exporter_timeout: 2000
security:
  security_protocol: sasl_ssl
  sasl_mechanism: PLAIN
  sasl_username: aggregator
  sasl_password: secret
  client_dns_lookup: use_all_dns_ips
  session_timeout: 45000
  schema_registry_user_info: registry:password
aggregation:
  partitions: 3
  buffer_size: 500
  window_size: 60000
  grace: 1800000
  retention: 3600000
  max_entries: 100000
  sweep_interval: 5000
input:
  topic: page-views
  value_format: !Avro
    url: http://localhost:8081
  consumer_config:
    bootstrap.servers: localhost:9092
    group.id: pageview-aggregator
output: !KafkaAvro
  topic: page-views-by-postcode
  producer_config:
    bootstrap.servers: localhost:9092
  schema_registry_url: http://localhost:8081
"#;

const MINIMAL_CONFIG: &str = r#"input:
  topic: page-views
  value_format: Json
  consumer_config:
    bootstrap.servers: localhost:9092
    group.id: pageview-aggregator
output: !KafkaJson
  topic: page-views-by-postcode
  producer_config:
    bootstrap.servers: localhost:9092
"#;

fn sasl_ssl() -> KafkaSecurityConfig {
    KafkaSecurityConfig {
        security_protocol: "SASL_SSL".to_string(),
        sasl_mechanism: Some("PLAIN".to_string()),
        sasl_username: Some("aggregator".to_string()),
        sasl_password: Some("secret".to_string()),
        client_dns_lookup: Some("use_all_dns_ips".to_string()),
        session_timeout: Some(Duration::from_secs(45)),
        schema_registry_user_info: Some("registry:password".to_string()),
    }
}

#[test]
fn test_deserialize_full_config() {
    let config: AggregatorConfig = serde_yaml::from_str(FULL_CONFIG).unwrap();

    assert_eq!(config.runtime.threads, Some(4));
    assert_eq!(config.logging.level, "debug");
    let telemetry = config.telemetry.unwrap();
    assert_eq!(telemetry.url(), "http://localhost:4317");
    assert_eq!(telemetry.exporter_timeout, Duration::from_secs(2));
    assert_eq!(telemetry.reader_interval, default_telemetry_interval());
    assert_eq!(config.security, Some(KafkaSecurityConfig {
        security_protocol: "sasl_ssl".to_string(),
        ..sasl_ssl()
    }));
    assert_eq!(
        config.aggregation,
        AggregationConfig {
            partitions: 3,
            buffer_size: 500,
            window_size: Duration::from_secs(60),
            grace: Duration::from_secs(1800),
            retention: Duration::from_secs(3600),
            max_entries: Some(100_000),
            sweep_interval: Duration::from_secs(5),
        }
    );
    assert_eq!(config.input.topic, "page-views");
    assert_eq!(
        config.input.value_format,
        ValueFormat::Avro(SchemaRegistryConfig {
            url: "http://localhost:8081".to_string()
        })
    );
    assert!(matches!(config.output, PublisherEndpoint::KafkaAvro(_)));
}

#[test]
fn test_deserialize_minimal_config_defaults() {
    let config: AggregatorConfig = serde_yaml::from_str(MINIMAL_CONFIG).unwrap();

    assert_eq!(config.runtime.threads, None);
    assert_eq!(config.logging.level, "info");
    assert!(config.telemetry.is_none());
    assert!(config.security.is_none());
    assert_eq!(config.aggregation, AggregationConfig::default());
    assert_eq!(config.aggregation.window_size, Duration::from_secs(60));
    assert_eq!(config.aggregation.grace, Duration::from_secs(30 * 60));
    assert_eq!(config.aggregation.retention, Duration::from_secs(60 * 60));
    assert_eq!(config.input.value_format, ValueFormat::Json);
    let mut consumer_config = HashMap::new();
    consumer_config.insert(
        "bootstrap.servers".to_string(),
        "localhost:9092".to_string(),
    );
    consumer_config.insert("group.id".to_string(), "pageview-aggregator".to_string());
    assert_eq!(config.input.consumer_config, consumer_config);
    assert!(matches!(config.output, PublisherEndpoint::KafkaJson(_)));
    assert_eq!(config.aggregation.validate(), Ok(()));
}

#[test]
fn test_serialize_aggregation_config() {
    let yaml = serde_yaml::to_string(&AggregationConfig::default()).unwrap();
    let expected = r#"partitions: 1
buffer_size: 1000
window_size: 60000
grace: 1800000
retention: 3600000
sweep_interval: 10000
"#;
    assert_eq!(yaml, expected);
}

#[test]
fn test_aggregation_config_validate() {
    let config = AggregationConfig {
        partitions: 0,
        ..Default::default()
    };
    assert_eq!(
        config.validate(),
        Err(ConfigurationError::InvalidPartitionCount)
    );

    let config = AggregationConfig {
        buffer_size: 0,
        ..Default::default()
    };
    assert_eq!(config.validate(), Err(ConfigurationError::InvalidBufferSize));

    let config = AggregationConfig {
        sweep_interval: Duration::ZERO,
        ..Default::default()
    };
    assert_eq!(
        config.validate(),
        Err(ConfigurationError::InvalidSweepInterval)
    );

    let config = AggregationConfig {
        window_size: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Windowing(AggregationError::Window(_)))
    ));

    let config = AggregationConfig {
        retention: Duration::from_secs(30 * 60),
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::Windowing(AggregationError::Eviction(_))
    ));
    assert!(err.to_string().starts_with("invalid windowing"));
}

#[test]
fn test_security_applied_for_sasl_ssl() {
    let mut client_config = ClientConfig::new();
    KafkaSecurityConfig {
        security_protocol: "sasl_ssl".to_string(),
        ..sasl_ssl()
    }
    .apply(&mut client_config);

    assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
    assert_eq!(client_config.get("sasl.mechanism"), Some("PLAIN"));
    assert_eq!(client_config.get("sasl.username"), Some("aggregator"));
    assert_eq!(client_config.get("sasl.password"), Some("secret"));
    assert_eq!(client_config.get("client.dns.lookup"), Some("use_all_dns_ips"));
    assert_eq!(client_config.get("session.timeout.ms"), Some("45000"));
}

#[test]
fn test_security_ignored_for_other_protocols() {
    let mut client_config = ClientConfig::new();
    let security = KafkaSecurityConfig {
        security_protocol: "PLAINTEXT".to_string(),
        ..sasl_ssl()
    };
    security.apply(&mut client_config);

    assert_eq!(client_config.get("security.protocol"), None);
    assert_eq!(client_config.get("sasl.username"), None);
    assert_eq!(security.schema_registry_credentials(), None);
}

#[test]
fn test_schema_registry_credentials() {
    assert_eq!(
        sasl_ssl().schema_registry_credentials(),
        Some(("registry", Some("password")))
    );
    let security = KafkaSecurityConfig {
        schema_registry_user_info: Some("registry".to_string()),
        ..sasl_ssl()
    };
    assert_eq!(
        security.schema_registry_credentials(),
        Some(("registry", None))
    );
    let security = KafkaSecurityConfig {
        schema_registry_user_info: None,
        ..sasl_ssl()
    };
    assert_eq!(security.schema_registry_credentials(), None);
}

#[test]
fn test_environment_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("aggregator.yaml", MINIMAL_CONFIG)?;
        jail.set_env("PV_AGGREGATION__GRACE", "600000");
        jail.set_env("PV_AGGREGATION__PARTITIONS", "8");
        jail.set_env("PV_LOGGING__LEVEL", "warn");

        let config: AggregatorConfig = figment("aggregator.yaml").extract()?;
        assert_eq!(config.aggregation.grace, Duration::from_secs(600));
        assert_eq!(config.aggregation.partitions, 8);
        assert_eq!(config.aggregation.window_size, default_window_size());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.input.topic, "page-views");
        Ok(())
    });
}

#[test]
fn test_figment_accepts_single_key_map_enums() {
    let yaml = r#"input:
  topic: page-views
  value_format:
    Avro:
      url: http://localhost:8081
  consumer_config:
    bootstrap.servers: localhost:9092
output:
  KafkaJson:
    topic: page-views-by-postcode
    producer_config:
      bootstrap.servers: localhost:9092
"#;
    figment::Jail::expect_with(|jail| {
        jail.create_file("aggregator.yaml", yaml)?;

        let config: AggregatorConfig = figment("aggregator.yaml").extract()?;
        assert_eq!(
            config.input.value_format,
            ValueFormat::Avro(SchemaRegistryConfig {
                url: "http://localhost:8081".to_string()
            })
        );
        assert!(matches!(config.output, PublisherEndpoint::KafkaJson(_)));
        Ok(())
    });
}

#[test]
fn test_figment_loads_tagged_config() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("aggregator.yaml", FULL_CONFIG)?;

        let config: AggregatorConfig = figment("aggregator.yaml").extract()?;
        assert_eq!(config.aggregation.partitions, 3);
        assert!(matches!(config.output, PublisherEndpoint::KafkaAvro(_)));
        Ok(())
    });
}

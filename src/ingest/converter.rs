// src/ingest/converter.rs
use anyhow::{anyhow, bail, Context, Result};
use metrics::counter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConnectorConfig, ConverterSpec};
use crate::ingest::types::{Converter, NormalizedRecord};

pub const UNKNOWN_TAG: &str = "UnknownTag";
const DEFAULT_QUALITY: i64 = -1;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Canonical converter for `{"Values": [{"Name", "Value", "Quality"}, ...]}` payloads.
pub struct TagValuesConverter {
    clock: fn() -> i64,
}

impl TagValuesConverter {
    pub fn new() -> Self {
        Self { clock: now_millis }
    }

    /// Replace the wall clock (unix millis). Used by tests.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    fn convert_tags(&self, raw: &Value) -> Result<Vec<NormalizedRecord>> {
        let decoded;
        let doc = match raw {
            Value::String(text) => {
                decoded = serde_json::from_str::<Value>(text).context("decoding payload text")?;
                &decoded
            }
            other => other,
        };

        let obj = doc
            .as_object()
            .ok_or_else(|| anyhow!("payload is not a JSON object"))?;
        let Some(values) = obj.get("Values") else {
            return Ok(Vec::new());
        };
        let tags = values
            .as_array()
            .ok_or_else(|| anyhow!("\"Values\" is not an array"))?;

        let mut out = Vec::with_capacity(tags.len());
        for (idx, tag) in tags.iter().enumerate() {
            let tag = tag
                .as_object()
                .ok_or_else(|| anyhow!("Values[{idx}] is not an object"))?;
            let device_name = match tag.get("Name") {
                None | Some(Value::Null) => UNKNOWN_TAG.to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            // Each tag is stamped when it is processed.
            let ts = (self.clock)();
            let value = coerce_value(tag.get("Value")).with_context(|| format!("Values[{idx}].Value"))?;
            let quality =
                coerce_quality(tag.get("Quality")).with_context(|| format!("Values[{idx}].Quality"))?;
            out.push(NormalizedRecord::single(device_name, ts, value, quality));
        }
        Ok(out)
    }
}

impl Converter for TagValuesConverter {
    fn name(&self) -> &'static str {
        "TagValuesConverter"
    }

    fn convert(&self, config: &ConnectorConfig, raw: &Value) -> Vec<NormalizedRecord> {
        match self.convert_tags(raw) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    connector = %config.name,
                    converter = self.name(),
                    error = %format!("{e:#}"),
                    "failed to convert payload, dropping batch"
                );
                counter!("converter_failures_total", "connector" => config.name.clone()).increment(1);
                Vec::new()
            }
        }
    }
}

fn coerce_value(v: Option<&Value>) -> Result<f64> {
    match v {
        None => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("number out of range: {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("not a number: {s:?}")),
        Some(Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(other) => bail!("not a number: {other}"),
    }
}

fn coerce_quality(v: Option<&Value>) -> Result<i64> {
    match v {
        None => Ok(DEFAULT_QUALITY),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite() && f.abs() < i64::MAX as f64) {
                Ok(f.trunc() as i64)
            } else {
                bail!("not an integer: {n}")
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| anyhow!("not an integer: {s:?}")),
        Some(Value::Bool(b)) => Ok(i64::from(*b)),
        Some(other) => bail!("not an integer: {other}"),
    }
}

impl Default for TagValuesConverter {
    fn default() -> Self {
        Self::new()
    }
}

// Needs no settings from the connector config.
fn build_tag_values(_config: &ConnectorConfig) -> Result<Arc<dyn Converter>> {
    Ok(Arc::new(TagValuesConverter::new()))
}

pub type ConverterFactory = fn(&ConnectorConfig) -> Result<Arc<dyn Converter>>;

/// Static lookup of converter implementations by `(extension, class)`.
pub struct ConverterRegistry {
    factories: HashMap<(String, String), ConverterFactory>,
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in converters.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register(&ConverterSpec::default(), build_tag_values);
        reg
    }

    pub fn register(&mut self, spec: &ConverterSpec, factory: ConverterFactory) {
        self.factories
            .insert((spec.extension.clone(), spec.class.clone()), factory);
    }

    pub fn build(&self, spec: &ConverterSpec, config: &ConnectorConfig) -> Result<Arc<dyn Converter>> {
        let factory = self
            .factories
            .get(&(spec.extension.clone(), spec.class.clone()))
            .ok_or_else(|| {
                anyhow!(
                    "no converter registered for extension={} class={}",
                    spec.extension,
                    spec.class
                )
            })?;
        factory(config)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn cfg() -> ConnectorConfig {
        ConnectorConfig::default()
    }

    fn conv() -> TagValuesConverter {
        TagValuesConverter::new()
    }

    #[test]
    fn single_tag_with_string_value() {
        let raw = json!({"Values":[{"Name":"T1","Value":"3.5","Quality":1}]});
        let out = conv().convert(&cfg(), &raw);
        assert_eq!(out.len(), 1);
        let r = &out[0];
        assert_eq!(r.device_name, "T1");
        assert_eq!(r.device_type, "default");
        assert!(r.attributes.is_empty());
        assert_eq!(r.telemetry.len(), 1);
        assert_eq!(r.telemetry[0].values.value, 3.5);
        assert_eq!(r.telemetry[0].values.quality, 1);
    }

    #[test]
    fn text_payload_is_decoded_first() {
        let raw = Value::String(r#"{"Values":[{"Name":"P","Value":2,"Quality":"0"}]}"#.into());
        let out = conv().convert(&cfg(), &raw);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].telemetry[0].values.value, 2.0);
        assert_eq!(out[0].telemetry[0].values.quality, 0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let out = conv().convert(&cfg(), &json!({"Values":[{}]}));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].device_name, UNKNOWN_TAG);
        assert_eq!(out[0].telemetry[0].values.value, 0.0);
        assert_eq!(out[0].telemetry[0].values.quality, -1);
    }

    #[test]
    fn missing_values_key_yields_nothing() {
        assert!(conv().convert(&cfg(), &json!({"Other": 1})).is_empty());
    }

    #[test]
    fn one_bad_value_drops_whole_batch() {
        let raw = json!({"Values":[
            {"Name":"ok","Value":1,"Quality":1},
            {"Name":"bad","Value":"abc","Quality":1}
        ]});
        assert!(conv().convert(&cfg(), &raw).is_empty());
    }

    #[test]
    fn malformed_shapes_yield_nothing() {
        let c = conv();
        for raw in [
            Value::String("{not json".into()),
            json!([1, 2, 3]),
            json!({"Values": 5}),
            json!({"Values": null}),
            json!({"Values": ["T1"]}),
            json!({"Values": [{"Name":"T","Value":null}]}),
            json!({"Values": [{"Name":"T","Quality":"1.5"}]}),
        ] {
            assert!(c.convert(&cfg(), &raw).is_empty(), "expected empty for {raw}");
        }
    }

    #[test]
    fn quality_float_truncates_and_bool_coerces() {
        let raw = json!({"Values":[{"Name":"a","Value":true,"Quality":2.9}]});
        let out = conv().convert(&cfg(), &raw);
        assert_eq!(out[0].telemetry[0].values.value, 1.0);
        assert_eq!(out[0].telemetry[0].values.quality, 2);
    }

    #[test]
    fn order_is_kept_and_each_tag_gets_its_own_timestamp() {
        static TICK: AtomicI64 = AtomicI64::new(1_700_000_000_000);
        fn fake_clock() -> i64 {
            TICK.fetch_add(1, Ordering::SeqCst)
        }
        let c = conv().with_clock(fake_clock);
        let raw = json!({"Values":[
            {"Name":"A","Value":1},
            {"Name":"B","Value":2},
            {"Name":"C","Value":3}
        ]});
        let out = c.convert(&cfg(), &raw);
        let names: Vec<_> = out.iter().map(|r| r.device_name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        let ts: Vec<_> = out.iter().map(|r| r.telemetry[0].ts).collect();
        assert!(ts[0] < ts[1] && ts[1] < ts[2], "ts = {ts:?}");
    }

    #[test]
    fn registry_builds_default_and_rejects_unknown() {
        let reg = ConverterRegistry::with_defaults();
        let c = reg.build(&ConverterSpec::default(), &cfg()).unwrap();
        assert_eq!(c.name(), "TagValuesConverter");

        let unknown = ConverterSpec {
            extension: "rest".into(),
            class: "Nope".into(),
        };
        let err = reg.build(&unknown, &cfg()).err().unwrap();
        assert!(err.to_string().contains("Nope"));
    }
}

//! Object-to-MIME-bundle conversion.
//!
//! An ordered sequence of probes; the first probe whose matcher accepts the
//! value renders the output bundle. New probes register at the front, so
//! embedders can override the built-ins.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rhai::Dynamic;
use serde_json::Value;

use rill_core::model::{Output, mime};

/// One conversion probe.
pub struct Probe {
    pub name: &'static str,
    matcher: fn(&Dynamic) -> bool,
    renderer: fn(&Dynamic) -> Option<Output>,
}

/// Ordered probe registry; first match wins.
pub struct ConverterRegistry {
    probes: Vec<Probe>,
}

impl ConverterRegistry {
    /// The built-in probe chain: binary blobs render as PNG images,
    /// chart-shaped maps as Vega-Lite or Plotly bundles, tabular values as
    /// table bundles, everything else as plain text.
    pub fn with_builtin_probes() -> Self {
        Self {
            probes: vec![
                Probe {
                    name: "png-blob",
                    matcher: is_blob,
                    renderer: render_blob,
                },
                Probe {
                    name: "vega-lite",
                    matcher: is_vega_lite,
                    renderer: render_vega_lite,
                },
                Probe {
                    name: "plotly",
                    matcher: is_plotly,
                    renderer: render_plotly,
                },
                Probe {
                    name: "table-map",
                    matcher: is_table_map,
                    renderer: render_table_map,
                },
                Probe {
                    name: "records",
                    matcher: is_record_array,
                    renderer: render_record_array,
                },
                Probe {
                    name: "text",
                    matcher: |_| true,
                    renderer: render_text,
                },
            ],
        }
    }

    /// Register a probe ahead of the built-ins.
    pub fn register_front(&mut self, probe: Probe) {
        self.probes.insert(0, probe);
    }

    /// Convert a value through the probe chain.
    pub fn convert(&self, value: &Dynamic) -> Option<Output> {
        self.probes
            .iter()
            .find(|probe| (probe.matcher)(value))
            .and_then(|probe| (probe.renderer)(value))
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtin_probes()
    }
}

fn as_map_json(value: &Dynamic) -> Option<Value> {
    if !value.is::<rhai::Map>() {
        return None;
    }
    rhai::serde::from_dynamic(value).ok()
}

fn is_blob(value: &Dynamic) -> bool {
    value.is::<rhai::Blob>()
}

fn render_blob(value: &Dynamic) -> Option<Output> {
    let blob = value.clone().try_cast::<rhai::Blob>()?;
    Some(Output::new(mime::PNG, Value::String(BASE64.encode(blob))))
}

fn is_vega_lite(value: &Dynamic) -> bool {
    as_map_json(value).is_some_and(|map| {
        map.get("$schema")
            .and_then(Value::as_str)
            .is_some_and(|schema| schema.contains("vega-lite"))
    })
}

fn is_plotly(value: &Dynamic) -> bool {
    as_map_json(value)
        .is_some_and(|map| map.get("data").is_some() && map.get("layout").is_some())
}

fn render_vega_lite(value: &Dynamic) -> Option<Output> {
    Some(Output::new(mime::VEGA_LITE, as_map_json(value)?))
}

fn render_plotly(value: &Dynamic) -> Option<Output> {
    Some(Output::new(mime::PLOTLY, as_map_json(value)?))
}

fn is_table_map(value: &Dynamic) -> bool {
    as_map_json(value)
        .is_some_and(|map| map.get("columns").is_some() && map.get("rows").is_some())
}

fn render_table_map(value: &Dynamic) -> Option<Output> {
    let mut map = as_map_json(value)?;
    if let Some(object) = map.as_object_mut() {
        object
            .entry("type")
            .or_insert_with(|| Value::String("table".to_string()));
    }
    Some(Output::new(mime::JSON, map))
}

fn is_record_array(value: &Dynamic) -> bool {
    if !value.is::<rhai::Array>() {
        return false;
    }
    let Some(array) = value.clone().try_cast::<rhai::Array>() else {
        return false;
    };
    !array.is_empty() && array.iter().all(|item| item.is::<rhai::Map>())
}

/// An array of maps renders as a table; the first record's keys (sorted)
/// become the columns.
fn render_record_array(value: &Dynamic) -> Option<Output> {
    let records: Vec<Value> = rhai::serde::from_dynamic(value).ok()?;
    let first = records.first()?.as_object()?;
    let columns: Vec<String> = first.keys().cloned().collect();
    let rows: Vec<Value> = records
        .iter()
        .map(|record| {
            let object = record.as_object();
            Value::Array(
                columns
                    .iter()
                    .map(|column| {
                        object
                            .and_then(|o| o.get(column))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            )
        })
        .collect();
    Some(Output::table(
        columns.into_iter().map(Value::String).collect(),
        rows,
        String::new(),
    ))
}

fn render_text(value: &Dynamic) -> Option<Output> {
    Some(Output::text(value.to_string()))
}

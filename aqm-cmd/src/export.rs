//! GeoJSON export of one map view.

use crate::context::{MonitoringContext, Selection, View};
use crate::options::SourceOptions;
use aqm_feeds::geojson::FeatureCollection;
use log::{info, warn};
use std::path::Path;

/// Serialize a view as pretty-printed GeoJSON.
pub fn render(collection: &FeatureCollection) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(collection)?)
}

/// Load the sources, apply the selection and write one view to `output`,
/// or to stdout when no output is given.
pub async fn run_geojson(
    options: &SourceOptions,
    view: View,
    selection: Selection,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let context = MonitoringContext::connect(options.sources()?, selection, options.client())?;
    context.wait_settled().await;
    let error = context.error_message();
    if !error.is_empty() {
        warn!("{}", error);
    }
    if let Some(window_error) = context.window_error() {
        anyhow::bail!("Invalid selection: {}", window_error);
    }

    let collection = context.geojson_now(view);
    let json = render(&collection)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!("Wrote {} features to {}", collection.len(), path.display());
        }
        None => println!("{}", json),
    }
    context.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqm_feeds::geojson::Feature;
    use serde_json::{Map, Value};

    #[test]
    fn test_render_feature_collection() {
        let mut properties = Map::new();
        properties.insert("id".to_string(), Value::String("a".to_string()));
        let collection = FeatureCollection::new(vec![Feature::point(-120.0, 38.0, properties)]);
        let parsed: Value = serde_json::from_str(&render(&collection).unwrap()).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"][0]["geometry"]["coordinates"][0], -120.0);
        assert_eq!(parsed["features"][0]["properties"]["id"], "a");
    }
}

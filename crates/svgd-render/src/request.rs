//! Render requests and their script-side representation.

use rhai::{Array, Dynamic, Map};
use svgd_metrics::{MetricDefinition, NamedSeries};

/// Everything a render script receives for one chart.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Cleaned series to draw.
    pub series: Vec<NamedSeries>,
    /// Metric identifier, e.g. `cpu_process`.
    pub metric_type: String,
    /// Path parameter, if the metric takes one.
    pub param: Option<String>,
    /// Rendered chart title.
    pub title: String,
    /// Rendered y-axis label.
    pub y_label: String,
    /// Whether values are percentages.
    pub is_percentage: bool,
    /// Transform name.
    pub transform_type: String,
    /// Scale multiplier.
    pub value_multiplier: f64,
    /// Scale divisor.
    pub transform_divisor: f64,
    /// Axis value format.
    pub value_format: String,
}

impl RenderRequest {
    /// Builds a request from a metric definition and its transformed series.
    #[must_use]
    pub fn new(series: Vec<NamedSeries>, definition: &MetricDefinition, param: Option<&str>) -> Self {
        Self {
            series,
            metric_type: definition.metric_type(),
            param: param.map(str::to_string),
            title: definition.title().render(param),
            y_label: definition.y_label().render(param),
            is_percentage: definition.is_percentage(),
            transform_type: definition.transform().as_str().to_string(),
            value_multiplier: definition.multiplier(),
            transform_divisor: definition.divisor(),
            value_format: definition.value_format().to_string(),
        }
    }

    /// Returns the total number of points across all series.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.series.iter().map(NamedSeries::len).sum()
    }

    /// The series argument: `[#{name, data: [#{timestamp, value}]}]`.
    pub(crate) fn series_arg(&self) -> Array {
        self.series
            .iter()
            .map(|series| {
                let data: Array = series
                    .points()
                    .iter()
                    .map(|p| {
                        let mut point = Map::new();
                        point.insert("timestamp".into(), Dynamic::from(p.timestamp));
                        point.insert("value".into(), Dynamic::from(p.value));
                        Dynamic::from_map(point)
                    })
                    .collect();

                let mut entry = Map::new();
                entry.insert("name".into(), Dynamic::from(series.name().to_string()));
                entry.insert("data".into(), Dynamic::from_array(data));
                Dynamic::from_map(entry)
            })
            .collect()
    }

    /// The options argument, keyed the way chart scripts expect.
    pub(crate) fn options_arg(&self) -> Map {
        let mut options = Map::new();
        options.insert("metricType".into(), Dynamic::from(self.metric_type.clone()));
        if let Some(param) = &self.param {
            options.insert("param1".into(), Dynamic::from(param.clone()));
        }
        options.insert("title".into(), Dynamic::from(self.title.clone()));
        options.insert("yLabel".into(), Dynamic::from(self.y_label.clone()));
        options.insert("isPercentage".into(), Dynamic::from(self.is_percentage));
        options.insert("transformType".into(), Dynamic::from(self.transform_type.clone()));
        options.insert("valueMultiplier".into(), Dynamic::from(self.value_multiplier));
        options.insert("transformDivisor".into(), Dynamic::from(self.transform_divisor));
        options.insert("valueFormat".into(), Dynamic::from(self.value_format.clone()));
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svgd_metrics::{builtin_definitions, DataPoint};

    fn request(endpoint: &str, param: Option<&str>) -> RenderRequest {
        let definition = builtin_definitions()
            .into_iter()
            .find(|d| d.endpoint() == endpoint)
            .unwrap();
        let series = NamedSeries::try_new("value", vec![DataPoint::new(10, 1.5)]).unwrap();
        RenderRequest::new(vec![series], &definition, param)
    }

    #[test]
    fn takes_display_fields_from_definition() {
        let req = request("ram/process", Some("postgres"));
        assert_eq!(req.metric_type, "ram_process");
        assert_eq!(req.title, "Memory Usage for postgres");
        assert_eq!(req.transform_type, "scale");
        assert_eq!(req.transform_divisor, 1024.0 * 1024.0);
        assert_eq!(req.value_format, "%.1f");
        assert_eq!(req.point_count(), 1);
    }

    #[test]
    fn options_include_param_only_when_present() {
        let with = request("cpu/process", Some("nginx")).options_arg();
        assert_eq!(with["param1"].clone().into_string().unwrap(), "nginx");
        assert_eq!(with["metricType"].clone().into_string().unwrap(), "cpu_process");

        let without = request("cpu", None).options_arg();
        assert!(!without.contains_key("param1"));
        assert!(without["isPercentage"].as_bool().unwrap());
    }

    #[test]
    fn series_marshalled_as_maps() {
        let series = request("cpu", None).series_arg();
        assert_eq!(series.len(), 1);
        let entry = series[0].clone().cast::<Map>();
        assert_eq!(entry["name"].clone().into_string().unwrap(), "value");
        let data = entry["data"].clone().cast::<Array>();
        let point = data[0].clone().cast::<Map>();
        assert_eq!(point["timestamp"].as_int().unwrap(), 10);
        assert_eq!(point["value"].as_float().unwrap(), 1.5);
    }
}

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::error::{EngineError, EngineResult};

const RATIO_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "data_type", rename_all = "snake_case")]
pub enum CategoryShares {
    Ratio { values: BTreeMap<String, f64> },
    Absolute { values: BTreeMap<String, f64>, total: f64 },
}

impl CategoryShares {
    pub fn share(&self, entity: &str) -> Option<f64> {
        match self {
            Self::Ratio { values } => values.get(entity).copied(),
            Self::Absolute { values, total } => values.get(entity).map(|value| value / total),
        }
    }

    pub fn shares(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Ratio { values } => values.clone(),
            Self::Absolute { values, total } => values
                .iter()
                .map(|(entity, value)| (entity.clone(), value / total))
                .collect(),
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &String> {
        match self {
            Self::Ratio { values } | Self::Absolute { values, .. } => values.keys(),
        }
    }

    pub fn data_type(&self) -> &'static str {
        match self {
            Self::Ratio { .. } => "ratio",
            Self::Absolute { .. } => "absolute",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketShareReference {
    pub categories: BTreeMap<String, CategoryShares>,
}

impl MarketShareReference {
    pub fn category(&self, category: &str) -> Option<&CategoryShares> {
        self.categories.get(category)
    }

    pub fn from_json(value: &Value) -> EngineResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| EngineError::malformed_reference("*", "reference must be a JSON object"))?;

        let mut categories = BTreeMap::new();
        for (category, body) in object {
            categories.insert(category.clone(), parse_category(category, body)?);
        }
        Ok(Self { categories })
    }
}

fn parse_category(category: &str, body: &Value) -> EngineResult<CategoryShares> {
    let fields = body
        .as_object()
        .ok_or_else(|| EngineError::malformed_reference(category, "category entry must be an object"))?;

    let data_type = fields
        .get("data_type")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::malformed_reference(category, "missing data_type"))?;

    let entries = match fields.get("values") {
        Some(Value::Object(nested)) => nested.iter().collect::<Vec<(&String, &Value)>>(),
        _ => fields
            .iter()
            .filter(|(key, _)| key.as_str() != "data_type")
            .collect::<Vec<(&String, &Value)>>(),
    };

    let mut values = BTreeMap::new();
    for (entity, raw) in entries {
        let value = raw.as_f64().ok_or_else(|| {
            EngineError::malformed_reference(category, format!("value for {entity} is not a number"))
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::malformed_reference(
                category,
                format!("value for {entity} must be finite and non-negative"),
            ));
        }
        values.insert(entity.trim().to_string(), value);
    }

    let total = values.values().sum::<f64>();
    if !(total.is_finite() && total > 0.0) {
        return Err(EngineError::malformed_reference(
            category,
            "values must sum to a finite positive total",
        ));
    }

    match data_type.trim().to_ascii_lowercase().as_str() {
        "ratio" => {
            if let Some((entity, value)) = values.iter().find(|(_, value)| **value > 1.0) {
                return Err(EngineError::malformed_reference(
                    category,
                    format!("ratio value {value} for {entity} exceeds 1; percentages must be declared as absolute"),
                ));
            }
            if total > 1.0 + RATIO_SUM_TOLERANCE {
                return Err(EngineError::malformed_reference(
                    category,
                    format!("ratio values sum to {total}, above 1"),
                ));
            }
            Ok(CategoryShares::Ratio { values })
        }
        "absolute" => Ok(CategoryShares::Absolute { values, total }),
        other => Err(EngineError::malformed_reference(
            category,
            format!("unknown data_type {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ratio_values_are_used_as_is() {
        let reference = MarketShareReference::from_json(&json!({
            "cloud": { "data_type": "ratio", "A": 0.5, "B": 0.3, "C": 0.2 }
        }))
        .expect("reference should parse");
        let cloud = reference.category("cloud").expect("category present");
        assert_eq!(cloud.share("A"), Some(0.5));
        assert_eq!(cloud.data_type(), "ratio");
    }

    #[test]
    fn absolute_values_are_divided_by_category_total() {
        let reference = MarketShareReference::from_json(&json!({
            "cloud": { "data_type": "absolute", "values": { "A": 300.0, "B": 100.0 } }
        }))
        .expect("reference should parse");
        let shares = reference.category("cloud").expect("category present").shares();
        assert_eq!(shares.get("A"), Some(&0.75));
        assert_eq!(shares.get("B"), Some(&0.25));
    }

    #[test]
    fn missing_data_type_is_malformed() {
        let error = MarketShareReference::from_json(&json!({ "cloud": { "A": 0.5 } }))
            .expect_err("missing data_type should fail");
        assert!(matches!(error, EngineError::MalformedReference { .. }));
        assert!(error.to_string().contains("missing data_type"));
    }

    #[test]
    fn zero_total_is_malformed() {
        let error = MarketShareReference::from_json(&json!({
            "cloud": { "data_type": "absolute", "A": 0.0, "B": 0.0 }
        }))
        .expect_err("zero total should fail");
        assert!(error.to_string().contains("positive total"));
    }

    #[test]
    fn percentage_shaped_ratio_is_rejected() {
        let error = MarketShareReference::from_json(&json!({
            "cloud": { "data_type": "ratio", "A": 60.0, "B": 40.0 }
        }))
        .expect_err("whole-number percentages declared as ratio should fail");
        assert!(error.to_string().contains("exceeds 1"));
    }
}

use std::fmt;
use serde::{Deserializer, Serializer};
use serde::ser::SerializeMap;
use serde::de::{MapAccess, Visitor};

/// Attribute pairs are kept as a `Vec` to preserve source order but travel
/// as a JSON object.
pub fn serialize_fields_as_map<S>(fields: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (k, v) in fields {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

/// Accepts string, number and bool values; anything else is rejected.
pub fn deserialize_fields_from_map<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct AttributeVisitor;

    impl<'de> Visitor<'de> for AttributeVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an object of scalar attributes")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "attribute '{}' is not a scalar: {}",
                            key, other
                        )))
                    }
                };
                fields.push((key, value));
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(AttributeVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Attributes {
        #[serde(
            serialize_with = "serialize_fields_as_map",
            deserialize_with = "deserialize_fields_from_map"
        )]
        fields: Vec<(String, String)>,
    }

    #[test]
    fn test_serialize_empty_attributes() {
        let json = serde_json::to_string(&Attributes { fields: Vec::new() }).unwrap();
        assert_eq!(json, r#"{"fields":{}}"#);
    }

    #[test]
    fn test_serialize_preserves_pairs() {
        let attrs = Attributes {
            fields: vec![
                ("model".to_string(), "gpt-4".to_string()),
                ("region".to_string(), "eu-west-1".to_string()),
            ],
        };
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"fields":{"model":"gpt-4","region":"eu-west-1"}}"#);
    }

    #[test]
    fn test_deserialize_scalar_values() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"fields":{"tokens":1200,"cached":true,"model":"gpt-4"}}"#).unwrap();
        assert!(attrs.fields.contains(&("tokens".to_string(), "1200".to_string())));
        assert!(attrs.fields.contains(&("cached".to_string(), "true".to_string())));
        assert!(attrs.fields.contains(&("model".to_string(), "gpt-4".to_string())));
    }

    #[test]
    fn test_deserialize_rejects_nested_values() {
        let result: Result<Attributes, _> =
            serde_json::from_str(r#"{"fields":{"usage":{"tokens":1}}}"#);
        assert!(result.is_err());
    }
}

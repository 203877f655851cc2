use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Match clause of one condition: exact value or full-text containment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MatchClause {
    Value { value: Value },
    Text { text: String },
}

/// A single payload condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub key: String,
    #[serde(rename = "match")]
    pub matches: MatchClause,
}

impl Condition {
    pub fn value(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            matches: MatchClause::Value {
                value: value.into(),
            },
        }
    }

    pub fn text(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            matches: MatchClause::Text { text: text.into() },
        }
    }

    fn evaluate(&self, payload: &Map<String, Value>) -> bool {
        let Some(actual) = payload.get(&self.key) else {
            return false;
        };
        match &self.matches {
            MatchClause::Value { value } => match (actual, value) {
                // Tag-style fields: a scalar condition matches any array element.
                (Value::Array(items), expected) => items.iter().any(|item| item == expected),
                (actual, expected) => actual == expected,
            },
            MatchClause::Text { text } => actual
                .as_str()
                .map(|s| s.to_lowercase().contains(&text.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

/// Condition set in the `{must, should, must_not}` shape shared by the REST
/// backend and the in-memory evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn should(mut self, condition: Condition) -> Self {
        self.should.push(condition);
        self
    }

    pub fn must_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// Evaluate against a payload: all `must`, at least one `should` (when any
    /// are present), no `must_not`.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        if !self.must.iter().all(|c| c.evaluate(payload)) {
            return false;
        }
        if !self.should.is_empty() && !self.should.iter().any(|c| c.evaluate(payload)) {
            return false;
        }
        self.must_not.iter().all(|c| !c.evaluate(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        json!({
            "file": "src/auth.ts",
            "chunkType": "code",
            "content": "export function validateToken(header: string) {}",
            "tags": ["session", "auth"],
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_must_value_match() {
        let filter = Filter::new().must(Condition::value("chunkType", "code"));
        assert!(filter.matches(&payload()));
        let filter = Filter::new().must(Condition::value("chunkType", "docs"));
        assert!(!filter.matches(&payload()));
    }

    #[test]
    fn test_value_match_against_array_field() {
        let filter = Filter::new().must(Condition::value("tags", "auth"));
        assert!(filter.matches(&payload()));
        let filter = Filter::new().must(Condition::value("tags", "billing"));
        assert!(!filter.matches(&payload()));
    }

    #[test]
    fn test_text_match_is_case_insensitive_containment() {
        let filter = Filter::new().should(Condition::text("content", "validatetoken"));
        assert!(filter.matches(&payload()));
    }

    #[test]
    fn test_should_requires_at_least_one() {
        let filter = Filter::new()
            .should(Condition::text("content", "nothing"))
            .should(Condition::text("content", "missing"));
        assert!(!filter.matches(&payload()));
    }

    #[test]
    fn test_must_not_excludes() {
        let filter = Filter::new().must_not(Condition::value("file", "src/auth.ts"));
        assert!(!filter.matches(&payload()));
    }

    #[test]
    fn test_wire_shape() {
        let filter = Filter::new()
            .must(Condition::value("file", "a.ts"))
            .should(Condition::text("content", "auth"));
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["must"][0]["key"], "file");
        assert_eq!(json["must"][0]["match"]["value"], "a.ts");
        assert_eq!(json["should"][0]["match"]["text"], "auth");
    }
}

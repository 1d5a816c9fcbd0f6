//! Serde helpers for decimal columns.
//!
//! The server renders numeric columns either as JSON numbers or as decimal
//! strings (`"150.00"`), depending on the endpoint. Both are accepted.

use serde::{de, Deserialize, Deserializer};

/// Tolerance used when comparing server-computed amounts.
pub const EPSILON: f64 = 0.005;

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Number(f64),
    Text(String),
}

impl Raw {
    fn into_f64<E: de::Error>(self) -> Result<f64, E> {
        match self {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("invalid decimal `{s}`"))),
        }
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Raw::deserialize(deserializer)?.into_f64()
}

pub mod option {
    use super::Raw;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            Some(raw) => raw.into_f64().map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Priced {
        #[serde(deserialize_with = "super::deserialize")]
        price: f64,
        #[serde(default, deserialize_with = "super::option::deserialize")]
        total: Option<f64>,
    }

    #[test]
    fn accepts_numbers_and_decimal_strings() {
        let a: Priced = serde_json::from_str(r#"{"price": 150, "total": "825.00"}"#).unwrap();
        assert_eq!(a.price, 150.0);
        assert_eq!(a.total, Some(825.0));

        let b: Priced = serde_json::from_str(r#"{"price": " 12.5 "}"#).unwrap();
        assert_eq!(b.price, 12.5);
        assert_eq!(b.total, None);

        let c: Priced = serde_json::from_str(r#"{"price": 1, "total": null}"#).unwrap();
        assert_eq!(c.total, None);
    }

    #[test]
    fn rejects_non_numeric_text() {
        let bad = serde_json::from_str::<Priced>(r#"{"price": "abc"}"#);
        assert!(bad.is_err());
    }
}

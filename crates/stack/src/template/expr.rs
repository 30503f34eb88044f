//! CloudFormation value expressions.
//!
//! An [`Expr`] is either a plain string known at synthesis time or an
//! intrinsic function the deploy engine resolves later.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Pseudo parameter for the partition (`aws`, `aws-cn`, ...).
pub const PSEUDO_PARTITION: &str = "AWS::Partition";
/// Pseudo parameter for the account ID.
pub const PSEUDO_ACCOUNT_ID: &str = "AWS::AccountId";

/// A template value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A string known at synthesis time.
    Literal(String),
    /// `{"Ref": name}`.
    Ref(String),
    /// `{"Fn::GetAtt": [logical_id, attribute]}`.
    GetAtt(String, String),
    /// `{"Fn::Join": [separator, [parts...]]}`.
    Join(String, Vec<Expr>),
    /// `{"Fn::Sub": template}`.
    Sub(String),
    /// `{"Fn::Base64": value}`.
    Base64(Box<Expr>),
}

impl Expr {
    /// Create a literal.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Reference a resource or parameter by logical ID.
    #[must_use]
    pub fn reference(logical_id: impl Into<String>) -> Self {
        Self::Ref(logical_id.into())
    }

    /// Read an attribute of a resource.
    #[must_use]
    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt(logical_id.into(), attribute.into())
    }

    /// `Ref: AWS::Partition`.
    #[must_use]
    pub fn partition() -> Self {
        Self::reference(PSEUDO_PARTITION)
    }

    /// Base64-encode a value at deploy time.
    #[must_use]
    pub fn base64(inner: Self) -> Self {
        Self::Base64(Box::new(inner))
    }

    /// Join `parts` with `separator`.
    ///
    /// Adjacent literals are merged and nested joins with the same separator
    /// are flattened. A join made only of literals collapses into a single
    /// literal, so the output never carries a `Fn::Join` it does not need.
    #[must_use]
    pub fn join(separator: &str, parts: impl IntoIterator<Item = Expr>) -> Self {
        let mut flat: Vec<Expr> = Vec::new();
        for part in parts {
            match part {
                Self::Join(inner_sep, inner) if inner_sep == separator => flat.extend(inner),
                other => flat.push(other),
            }
        }

        let mut merged: Vec<Expr> = Vec::with_capacity(flat.len());
        for part in flat {
            match (merged.last_mut(), part) {
                (Some(Self::Literal(prev)), Self::Literal(next)) => {
                    prev.push_str(separator);
                    prev.push_str(&next);
                }
                (_, part) => merged.push(part),
            }
        }

        match merged.len() {
            0 => Self::Literal(String::new()),
            1 if merged[0].is_literal() => merged.remove(0),
            _ => Self::Join(separator.to_string(), merged),
        }
    }

    /// Whether this value is fully known at synthesis time.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

/// Renders deploy-time values in `Fn::Sub` placeholder syntax, for previews.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) | Self::Sub(s) => f.write_str(s),
            Self::Ref(name) => write!(f, "${{{name}}}"),
            Self::GetAtt(id, attr) => write!(f, "${{{id}.{attr}}}"),
            Self::Join(sep, parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::Base64(inner) => write!(f, "{inner}"),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(s) => serializer.serialize_str(s),
            Self::Ref(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", name)?;
                map.end()
            }
            Self::GetAtt(id, attr) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &[id, attr])?;
                map.end()
            }
            Self::Join(sep, parts) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Join", &(sep, parts))?;
                map.end()
            }
            Self::Sub(template) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Sub", template)?;
                map.end()
            }
            Self::Base64(inner) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Base64", inner)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_of_literals_collapses() {
        let joined = Expr::join(" ", ["a".into(), "b".into(), "c".into()]);
        assert_eq!(joined, Expr::literal("a b c"));
    }

    #[test]
    fn test_join_keeps_tokens_and_merges_neighbours() {
        let joined = Expr::join(
            " ",
            [
                "aws s3api get-object --bucket".into(),
                Expr::Sub("bucket-${AWS::AccountId}".into()),
                "--key".into(),
                "abc.py".into(),
            ],
        );

        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!({
                "Fn::Join": [" ", [
                    "aws s3api get-object --bucket",
                    {"Fn::Sub": "bucket-${AWS::AccountId}"},
                    "--key abc.py"
                ]]
            })
        );
    }

    #[test]
    fn test_nested_join_flattens() {
        let inner = Expr::join("", ["x".into(), Expr::reference("R")]);
        let outer = Expr::join("", [inner, "y".into()]);
        assert_eq!(
            outer,
            Expr::Join(
                String::new(),
                vec!["x".into(), Expr::reference("R"), "y".into()]
            )
        );
    }

    #[test]
    fn test_intrinsic_shapes() {
        assert_eq!(
            serde_json::to_value(Expr::get_att("Instance", "PrivateIp")).unwrap(),
            json!({"Fn::GetAtt": ["Instance", "PrivateIp"]})
        );
        assert_eq!(
            serde_json::to_value(Expr::partition()).unwrap(),
            json!({"Ref": "AWS::Partition"})
        );
    }

    #[test]
    fn test_display_uses_placeholders() {
        let joined = Expr::join(
            " ",
            [
                "--bucket".into(),
                Expr::Sub("assets-${AWS::AccountId}".into()),
                Expr::reference("Bucket"),
                Expr::get_att("Instance", "PublicIp"),
            ],
        );
        assert_eq!(
            joined.to_string(),
            "--bucket assets-${AWS::AccountId} ${Bucket} ${Instance.PublicIp}"
        );
    }

    #[test]
    fn test_empty_join_is_empty_literal() {
        assert_eq!(Expr::join(",", []), Expr::literal(""));
    }
}

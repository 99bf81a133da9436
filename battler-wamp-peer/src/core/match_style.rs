/// How a procedure registration or subscription should be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStyle {
    Prefix,
    Wildcard,
}

impl TryFrom<&str> for MatchStyle {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "prefix" => Ok(Self::Prefix),
            "wildcard" => Ok(Self::Wildcard),
            _ => Err(Self::Error::msg(format!("invalid match style: {value}"))),
        }
    }
}

impl From<MatchStyle> for &'static str {
    fn from(value: MatchStyle) -> Self {
        match value {
            MatchStyle::Prefix => "prefix",
            MatchStyle::Wildcard => "wildcard",
        }
    }
}

impl From<MatchStyle> for String {
    fn from(value: MatchStyle) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

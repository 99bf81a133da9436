/// How the router selects a callee for a shared registration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPolicy {
    /// Only one callee may register the procedure.
    #[default]
    Single,
    RoundRobin,
    Random,
    First,
    Last,
}

impl TryFrom<&str> for InvocationPolicy {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "single" => Ok(Self::Single),
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => Err(Self::Error::msg(format!(
                "invalid invocation policy: {value}"
            ))),
        }
    }
}

impl From<InvocationPolicy> for &'static str {
    fn from(value: InvocationPolicy) -> Self {
        match value {
            InvocationPolicy::Single => "single",
            InvocationPolicy::RoundRobin => "roundrobin",
            InvocationPolicy::Random => "random",
            InvocationPolicy::First => "first",
            InvocationPolicy::Last => "last",
        }
    }
}

impl From<InvocationPolicy> for String {
    fn from(value: InvocationPolicy) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

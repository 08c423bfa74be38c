use std::fmt;

/// Identifies one in-flight outbound call.
///
/// Transports that dispatch a single call at a time never issue a key; the tracker then files
/// the call under [`CorrelationKey::SINGLE`]. Batch dispatchers name every call explicitly,
/// either by position or by a caller-chosen string.
///
/// A key can also be attached to an individual request as an extension, in which case
/// [`AnalyticsMiddleware`] uses it instead of minting one:
///
/// ```ignore
/// let resp = client
///     .get("https://api.example.com/orders")
///     .with_extension(CorrelationKey::from("orders"))
///     .send()
///     .await?;
/// ```
///
/// [`AnalyticsMiddleware`]: crate::AnalyticsMiddleware
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CorrelationKey {
    Index(i64),
    Name(String),
}

impl CorrelationKey {
    /// The key used when the transport does not supply one.
    pub const SINGLE: CorrelationKey = CorrelationKey::Index(0);

    /// Returns true for the reserved single-call key.
    pub fn is_single(&self) -> bool {
        *self == Self::SINGLE
    }
}

impl Default for CorrelationKey {
    fn default() -> Self {
        Self::SINGLE
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Index(index) => write!(f, "{}", index),
            CorrelationKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for CorrelationKey {
    fn from(index: i64) -> Self {
        CorrelationKey::Index(index)
    }
}

impl From<i32> for CorrelationKey {
    fn from(index: i32) -> Self {
        CorrelationKey::Index(index.into())
    }
}

impl From<&str> for CorrelationKey {
    fn from(name: &str) -> Self {
        CorrelationKey::Name(name.to_owned())
    }
}

impl From<String> for CorrelationKey {
    fn from(name: String) -> Self {
        CorrelationKey::Name(name)
    }
}

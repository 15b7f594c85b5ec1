/// Derives the object key for a batch from the timestamps folded into it.
///
/// Timestamps arrive in call order, oldest first, and are never empty.
pub trait KeyNamer: Send + Sync + 'static {
    fn key_name(&self, timestamps: &[u64]) -> String;
}

impl<F> KeyNamer for F
where
    F: Fn(&[u64]) -> String + Send + Sync + 'static,
{
    fn key_name(&self, timestamps: &[u64]) -> String {
        self(timestamps)
    }
}

/// `<prefix><first>-<last>.gz`, collapsing to `<prefix><ts>.gz` for a
/// single-interval batch.
#[derive(Debug, Clone, Default)]
pub struct TimestampRangeKey {
    prefix: String,
}

impl TimestampRangeKey {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl KeyNamer for TimestampRangeKey {
    fn key_name(&self, timestamps: &[u64]) -> String {
        match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) if first != last => {
                format!("{}{first}-{last}.gz", self.prefix)
            }
            (Some(only), _) => format!("{}{only}.gz", self.prefix),
            _ => format!("{}empty.gz", self.prefix),
        }
    }
}

/// What a writer does with an error before propagating it to the caller.
///
/// `Report` sends a best-effort error notification to the remote service
/// identifying the sequence/topic and the error string; `Ignore` suppresses
/// the notification. Local cleanup happens either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnErrorPolicy {
    #[default]
    Report,
    Ignore,
}

/// Configuration options for sequence and topic writers.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Flush the topic buffer once its approximate encoded size reaches
    /// this many bytes.
    pub max_batch_bytes: usize,
    /// Flush the topic buffer once it holds this many records.
    pub max_batch_records: usize,
    /// Error-reporting policy, evaluated independently for the sequence and
    /// for each topic.
    pub on_error: OnErrorPolicy,
    /// Cap on concurrently running background flushes for one sequence.
    /// `0` defaults to the executor worker count.
    pub max_concurrent_flushes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            max_batch_bytes: 4 * 1024 * 1024,
            max_batch_records: 4096,
            on_error: OnErrorPolicy::default(),
            max_concurrent_flushes: 0,
        }
    }
}

impl WriterConfig {
    pub fn with_batch_limits(mut self, max_bytes: usize, max_records: usize) -> Self {
        self.max_batch_bytes = max_bytes;
        self.max_batch_records = max_records;
        self
    }

    pub fn with_on_error(mut self, policy: OnErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn with_max_concurrent_flushes(mut self, cap: usize) -> Self {
        self.max_concurrent_flushes = cap;
        self
    }
}

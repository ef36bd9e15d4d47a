/// A memory column from `top`, kept in raw and decoded forms.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryField {
    /// Text as printed by the sampler, e.g. `50.883g`.
    pub raw: String,
    pub bytes: u64,
    /// SI-humanized byte count, e.g. `54 GB`.
    pub human: String,
}

/// One parsed process line of `top -b` output.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub pid: u32,
    pub user: String,
    /// `PR` column; realtime (`rt`) is stored as -100.
    pub priority: i64,
    pub nice: i64,
    pub virt: MemoryField,
    pub res: MemoryField,
    pub shr: MemoryField,
    pub state: String,
    pub status: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    /// `TIME+` column, kept verbatim (`mm:ss.hh`).
    pub cpu_time: String,
    pub command: String,
}

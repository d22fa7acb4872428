use crate::writer::PartitionWriteStats;
use serde::Serialize;

#[derive(Clone, Debug, Default)]
pub struct MapTaskStats {
    pub split: usize,
    pub lines_in: u64,
    pub total_emits: u64,
    pub records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SortTaskStats {
    pub reducer: usize,
    pub records_in: u64,
    pub bytes_in: u64,
    pub sort_ms: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ReduceTaskStats {
    pub reducer: usize,
    pub records_in: u64,
    pub groups: u64,
    pub lines_out: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub tasks: usize,
    pub input_bytes: u64,
    pub total_lines: u64,
    pub total_emits: u64,
    /// Records shuffled after map-side combining.
    pub total_records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    /// Bytes the partition IO threads put on disk, and in how many writes.
    pub bytes_written: u64,
    pub write_calls: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct SortStatsAgg {
    pub reducers: usize,
    pub total_records: u64,
    pub total_bytes: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStatsAgg {
    pub reducers: usize,
    pub total_records: u64,
    pub total_groups: u64,
    pub total_lines_out: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

/// Everything a finished job reports.
#[derive(Default, Clone, Debug, Serialize)]
pub struct JobStats {
    pub job_id: String,
    pub map: MapStats,
    pub sort: SortStatsAgg,
    pub reduce: ReduceStatsAgg,
    pub wall_ms: u64,
}

impl MapStats {
    pub fn aggregate(per_task: &[MapTaskStats], input_bytes: u64, wall_ms: u64) -> Self {
        Self {
            tasks: per_task.len(),
            input_bytes,
            total_lines: per_task.iter().map(|t| t.lines_in).sum(),
            total_emits: per_task.iter().map(|t| t.total_emits).sum(),
            total_records_out: per_task.iter().map(|t| t.records_out).sum(),
            total_bytes_out: per_task.iter().map(|t| t.total_bytes_out).sum(),
            total_flushes: per_task.iter().map(|t| t.total_flushes).sum(),
            bytes_written: 0,
            write_calls: 0,
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }

    pub fn record_partition_writes(&mut self, per_partition: &[PartitionWriteStats]) {
        self.bytes_written = per_partition.iter().map(|p| p.bytes_written).sum();
        self.write_calls = per_partition.iter().map(|p| p.write_calls).sum();
    }
}

impl SortStatsAgg {
    pub fn aggregate(per_reducer: &[SortTaskStats], wall_ms: u64) -> Self {
        Self {
            reducers: per_reducer.len(),
            total_records: per_reducer.iter().map(|t| t.records_in).sum(),
            total_bytes: per_reducer.iter().map(|t| t.bytes_in).sum(),
            min_reducer_ms: per_reducer.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_reducer.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

impl ReduceStatsAgg {
    pub fn aggregate(per_reducer: &[ReduceTaskStats], wall_ms: u64) -> Self {
        Self {
            reducers: per_reducer.len(),
            total_records: per_reducer.iter().map(|t| t.records_in).sum(),
            total_groups: per_reducer.iter().map(|t| t.groups).sum(),
            total_lines_out: per_reducer.iter().map(|t| t.lines_out).sum(),
            min_reducer_ms: per_reducer.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_reducer.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

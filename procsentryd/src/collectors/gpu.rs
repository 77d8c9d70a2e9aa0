use log::debug;
use serde::{Deserialize, Serialize};
use std::process::Command;

const QUERY: &str = "--query-gpu=name,utilization.gpu,memory.used,memory.total,temperature.gpu";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    pub name: String,
    pub load_percent: f32,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub temperature_c: Option<f32>,
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output, one GPU per row.
/// Rows that do not carry at least name, load and memory are skipped.
pub fn parse_nvidia_smi(content: &str) -> Vec<GpuStats> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    reader
        .records()
        .filter_map(|row| match row {
            Ok(record) => gpu_from_record(&record),
            Err(err) => {
                debug!("[gpu] unreadable nvidia-smi row: {err}");
                None
            }
        })
        .collect()
}

fn gpu_from_record(record: &csv::StringRecord) -> Option<GpuStats> {
    let name = record.get(0).filter(|name| !name.is_empty())?;
    Some(GpuStats {
        name: name.to_string(),
        load_percent: record.get(1)?.parse().ok()?,
        memory_used_mb: record.get(2)?.parse().ok()?,
        memory_total_mb: record.get(3)?.parse().ok()?,
        temperature_c: record.get(4).and_then(|t| t.parse().ok()),
    })
}

/// Best-effort GPU query. Missing tooling, a failing command or empty output
/// all mean "no GPU data".
pub fn query() -> Option<Vec<GpuStats>> {
    let output = match Command::new("nvidia-smi")
        .args([QUERY, "--format=csv,noheader,nounits"])
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            debug!("[gpu] nvidia-smi unavailable: {err}");
            return None;
        }
    };

    if !output.status.success() {
        debug!("[gpu] nvidia-smi exited with {}", output.status);
        return None;
    }

    let gpus = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout));
    (!gpus.is_empty()).then_some(gpus)
}

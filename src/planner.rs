//! Heap sizing for server launches.
//!
//! [`plan`] turns the host's total memory and an optional explicit request
//! into the heap bounds and tuning flags passed to the runtime. It performs
//! no I/O; callers read host memory fresh before every launch.
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Memory kept free for the OS and everything else on the host when an
/// explicit heap request is clamped.
pub const RESERVED_MB: u64 = 2048;

/// Smallest heap the default heuristic will ever hand out.
pub const MIN_DEFAULT_HEAP_MB: u64 = 1024;

/// Runtime tuning flags appended after the heap bounds, revision 1.
pub const TUNING_FLAGS: [&str; 3] = [
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
];

/// Explicit heap bounds requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapRequest {
    pub min_mb: u64,
    pub max_mb: u64,
}

/// A requested maximum that was lowered to respect [`RESERVED_MB`].
///
/// This is a warning for the caller to surface, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clamp {
    pub requested_max_mb: u64,
    pub applied_max_mb: u64,
}

/// Heap bounds and runtime flags for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub min_heap_mb: u64,
    pub max_heap_mb: u64,
    pub extra_flags: Vec<String>,
    /// Present when the explicit request exceeded the host ceiling.
    pub clamp: Option<Clamp>,
}

impl ResourcePlan {
    pub fn is_clamped(&self) -> bool {
        self.clamp.is_some()
    }

    /// Heap bounds followed by the tuning flags, in launch order.
    pub fn runtime_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.extra_flags.len());
        args.push(format!("-Xms{}M", self.min_heap_mb));
        args.push(format!("-Xmx{}M", self.max_heap_mb));
        args.extend(self.extra_flags.iter().cloned());
        args
    }
}

/// Computes a [`ResourcePlan`] for a host with `host_total_mb` of memory.
///
/// Without a request, both bounds are half the host memory (never below
/// [`MIN_DEFAULT_HEAP_MB`]). With a request, the maximum is capped at
/// `host_total_mb - RESERVED_MB` and the minimum never exceeds the maximum.
///
/// # Examples
///
/// ```
/// use moonlight::planner::{plan, HeapRequest};
///
/// let default = plan(16_384, None).unwrap();
/// assert_eq!((default.min_heap_mb, default.max_heap_mb), (8_192, 8_192));
///
/// let clamped = plan(8_192, Some(HeapRequest { min_mb: 1024, max_mb: 8_192 })).unwrap();
/// assert_eq!(clamped.max_heap_mb, 6_144);
/// assert!(clamped.is_clamped());
/// ```
pub fn plan(host_total_mb: u64, request: Option<HeapRequest>) -> Result<ResourcePlan> {
    if host_total_mb == 0 {
        return Err(Error::InvalidPlan(
            "host total memory must be greater than zero".to_string(),
        ));
    }

    let (min_heap_mb, max_heap_mb, clamp) = match request {
        None => {
            let target = default_heap_mb(host_total_mb);
            (target, target, None)
        }
        Some(request) => explicit_bounds(host_total_mb, request)?,
    };

    Ok(ResourcePlan {
        min_heap_mb,
        max_heap_mb,
        extra_flags: TUNING_FLAGS.iter().map(|f| f.to_string()).collect(),
        clamp,
    })
}

// Half of host memory, rounded half up.
fn default_heap_mb(host_total_mb: u64) -> u64 {
    MIN_DEFAULT_HEAP_MB.max(host_total_mb / 2 + host_total_mb % 2)
}

fn explicit_bounds(host_total_mb: u64, request: HeapRequest) -> Result<(u64, u64, Option<Clamp>)> {
    if request.min_mb == 0 || request.max_mb == 0 {
        return Err(Error::InvalidPlan(format!(
            "requested heap bounds must be non-zero (min {} MB, max {} MB)",
            request.min_mb, request.max_mb
        )));
    }

    let ceiling = host_total_mb.checked_sub(RESERVED_MB).filter(|c| *c > 0).ok_or_else(|| {
        Error::InvalidPlan(format!(
            "host has {} MB, not more than the {} MB reserve",
            host_total_mb, RESERVED_MB
        ))
    })?;

    let (max_mb, clamp) = if request.max_mb > ceiling {
        let clamp = Clamp {
            requested_max_mb: request.max_mb,
            applied_max_mb: ceiling,
        };
        (ceiling, Some(clamp))
    } else {
        (request.max_mb, None)
    };

    Ok((request.min_mb.min(max_mb), max_mb, clamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_is_half_of_host_memory() {
        let plan = plan(32_768, None).unwrap();
        assert_eq!(plan.min_heap_mb, 16_384);
        assert_eq!(plan.max_heap_mb, 16_384);
        assert!(!plan.is_clamped());
    }

    #[test]
    fn test_default_plan_rounds_half_up() {
        let plan = plan(4_097, None).unwrap();
        assert_eq!(plan.max_heap_mb, 2_049);
    }

    #[test]
    fn test_default_plan_has_floor() {
        let plan = plan(1_500, None).unwrap();
        assert_eq!(plan.max_heap_mb, MIN_DEFAULT_HEAP_MB);
        assert_eq!(plan.min_heap_mb, MIN_DEFAULT_HEAP_MB);
    }

    #[test]
    fn test_explicit_request_within_limits_passes_through() {
        let plan = plan(16_384, Some(HeapRequest { min_mb: 2_048, max_mb: 4_096 })).unwrap();
        assert_eq!((plan.min_heap_mb, plan.max_heap_mb), (2_048, 4_096));
        assert_eq!(plan.clamp, None);
    }

    #[test]
    fn test_explicit_request_is_clamped_to_reserve() {
        let plan = plan(8_000, Some(HeapRequest { min_mb: 7_000, max_mb: 12_000 })).unwrap();
        assert_eq!(plan.max_heap_mb, 5_952);
        assert_eq!(plan.min_heap_mb, 5_952);
        assert_eq!(
            plan.clamp,
            Some(Clamp {
                requested_max_mb: 12_000,
                applied_max_mb: 5_952
            })
        );
    }

    #[test]
    fn test_runtime_args_order() {
        let plan = plan(4_096, None).unwrap();
        assert_eq!(
            plan.runtime_args(),
            vec![
                "-Xms2048M",
                "-Xmx2048M",
                "-XX:+UseG1GC",
                "-XX:+ParallelRefProcEnabled",
                "-XX:MaxGCPauseMillis=200",
            ]
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(plan(0, None), Err(Error::InvalidPlan(_))));
        assert!(matches!(
            plan(2_048, Some(HeapRequest { min_mb: 512, max_mb: 1_024 })),
            Err(Error::InvalidPlan(_))
        ));
        assert!(matches!(
            plan(8_192, Some(HeapRequest { min_mb: 0, max_mb: 1_024 })),
            Err(Error::InvalidPlan(_))
        ));
    }
}

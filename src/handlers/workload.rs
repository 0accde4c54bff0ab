use axum::{extract::Path, Json};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use request_profiler::profiled;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{AppError, TimedResponse};

// ─── Limits ──────────────────────────────────────────────────────

/// Every fib frame is recorded, so keep the call tree in the low millions.
const MAX_FIB: u32 = 27;
const MAX_PRIME_LIMIT: u64 = 5_000_000;
const MAX_SORT_LEN: usize = 200_000;
/// Below this merge sort hands over to insertion sort
const INSERTION_CUTOFF: usize = 24;

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health() -> &'static str {
    let _frame = profiled!();
    "ok"
}

// ─── GET /api/fib/:n ─────────────────────────────────────────────

pub async fn fibonacci(Path(n): Path<u32>) -> Result<Json<TimedResponse<u64>>, AppError> {
    let _frame = profiled!();
    if n > MAX_FIB {
        return Err(AppError::TooLarge {
            what: "n",
            max: MAX_FIB as u64,
        });
    }

    let t0 = Instant::now();
    let value = fib(n);
    Ok(Json(TimedResponse::since(value, t0)))
}

fn fib(n: u32) -> u64 {
    let _frame = profiled!();
    if n < 2 {
        n as u64
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

// ─── GET /api/primes/:limit ──────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PrimeSummary {
    pub limit: u64,
    pub count: usize,
    pub largest: Option<u64>,
}

pub async fn primes(Path(limit): Path<u64>) -> Result<Json<TimedResponse<PrimeSummary>>, AppError> {
    let _frame = profiled!();
    if limit > MAX_PRIME_LIMIT {
        return Err(AppError::TooLarge {
            what: "limit",
            max: MAX_PRIME_LIMIT,
        });
    }

    let t0 = Instant::now();
    let found = sieve(limit as usize);
    let summary = PrimeSummary {
        limit,
        count: found.len(),
        largest: found.last().map(|&p| p as u64),
    };
    Ok(Json(TimedResponse::since(summary, t0)))
}

fn sieve(limit: usize) -> Vec<usize> {
    let _frame = profiled!();
    if limit < 2 {
        return Vec::new();
    }

    let mut composite = vec![false; limit + 1];
    let mut p = 2;
    while p * p <= limit {
        if !composite[p] {
            mark_multiples(&mut composite, p);
        }
        p += 1;
    }
    collect_unmarked(&composite)
}

fn mark_multiples(composite: &mut [bool], p: usize) {
    let _frame = profiled!();
    for m in (p * p..composite.len()).step_by(p) {
        composite[m] = true;
    }
}

fn collect_unmarked(composite: &[bool]) -> Vec<usize> {
    let _frame = profiled!();
    (2..composite.len()).filter(|&i| !composite[i]).collect()
}

// ─── POST /api/sort ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SortRequest {
    /// Number of random values to sort
    #[serde(default = "default_len")]
    pub len: usize,

    /// Fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_len() -> usize {
    10_000
}

#[derive(Debug, Serialize)]
pub struct SortSummary {
    pub len: usize,
    pub min: i64,
    pub max: i64,
    pub sorted: bool,
}

pub async fn sort_random(
    Json(req): Json<SortRequest>,
) -> Result<Json<TimedResponse<SortSummary>>, AppError> {
    let _frame = profiled!();
    if req.len == 0 {
        return Err(AppError::BadRequest("len must be positive".into()));
    }
    if req.len > MAX_SORT_LEN {
        return Err(AppError::TooLarge {
            what: "len",
            max: MAX_SORT_LEN as u64,
        });
    }

    let t0 = Instant::now();
    let mut values = random_values(req.len, req.seed);
    merge_sort(&mut values);

    let summary = SortSummary {
        len: values.len(),
        min: values[0],
        max: values[values.len() - 1],
        sorted: values.windows(2).all(|w| w[0] <= w[1]),
    };
    Ok(Json(TimedResponse::since(summary, t0)))
}

fn random_values(len: usize, seed: Option<u64>) -> Vec<i64> {
    let _frame = profiled!();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..len).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect()
}

fn merge_sort(values: &mut [i64]) {
    let _frame = profiled!();
    if values.len() <= INSERTION_CUTOFF {
        insertion_sort(values);
        return;
    }

    let mid = values.len() / 2;
    merge_sort(&mut values[..mid]);
    merge_sort(&mut values[mid..]);
    merge(values, mid);
}

fn merge(values: &mut [i64], mid: usize) {
    let _frame = profiled!();
    let left = values[..mid].to_vec();
    let right = values[mid..].to_vec();

    let (mut i, mut j) = (0, 0);
    for slot in values.iter_mut() {
        if j >= right.len() || (i < left.len() && left[i] <= right[j]) {
            *slot = left[i];
            i += 1;
        } else {
            *slot = right[j];
            j += 1;
        }
    }
}

fn insertion_sort(values: &mut [i64]) {
    let _frame = profiled!();
    for i in 1..values.len() {
        let mut j = i;
        while j > 0 && values[j - 1] > values[j] {
            values.swap(j - 1, j);
            j -= 1;
        }
    }
}

// ─── GET /api/panic ──────────────────────────────────────────────

/// Fails on purpose so the 500 report path can be seen in the logs.
pub async fn explode() -> &'static str {
    let _frame = profiled!();
    let rows = fib(15);
    panic!("requested failure after {rows} rows");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fib_values() {
        assert_eq!(fib(0), 0);
        assert_eq!(fib(1), 1);
        assert_eq!(fib(20), 6765);
    }

    #[test]
    fn sieve_counts_primes() {
        assert_eq!(sieve(1), Vec::<usize>::new());
        assert_eq!(sieve(30), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(sieve(10_000).len(), 1229);
    }

    #[test]
    fn merge_sort_orders_values() {
        let mut values = random_values(1_000, Some(7));
        let mut expected = values.clone();
        expected.sort_unstable();
        merge_sort(&mut values);
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn oversized_inputs_are_rejected() {
        assert!(fibonacci(Path(MAX_FIB + 1)).await.is_err());
        assert!(primes(Path(MAX_PRIME_LIMIT + 1)).await.is_err());
        let req = SortRequest { len: 0, seed: None };
        assert!(sort_random(Json(req)).await.is_err());
    }
}

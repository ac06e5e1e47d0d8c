//! Synthetic Workload Generator
//!
//! The sampling loop measures one invocation of a `Workload` per tick. The
//! workload is opaque to the loop: it only has to be bounded, measurable and
//! grow with intensity.
//!
//! ## ConvolutionWorkload
//! A 3x3 Sobel kernel convolved over a 256x256 matrix. Each intensity level
//! adds one full pass, feeding the previous pass's output back as input.

use crate::error::WorkloadError;
use crate::models::{clamp_intensity, MAX_INTENSITY, MIN_INTENSITY};
use std::hint::black_box;

/// Intensity level for the workload (1-5)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Intensity(i32);

impl Intensity {
    /// Create a new intensity (clamped to 1-5)
    pub fn new(value: i32) -> Self {
        Intensity(clamp_intensity(value))
    }

    /// Get the intensity value
    pub fn value(&self) -> i32 {
        self.0
    }

    pub const MIN: Intensity = Intensity(MIN_INTENSITY);
    pub const MAX: Intensity = Intensity(MAX_INTENSITY);
}

impl Default for Intensity {
    fn default() -> Self {
        Intensity::MIN
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A synchronous, CPU-bound unit of work.
///
/// Implementations run on a blocking thread; they must not rely on an async
/// runtime being present.
pub trait Workload: Send + Sync {
    /// Run the workload once at the given intensity.
    fn run(&self, intensity: Intensity) -> Result<(), WorkloadError>;
}

impl<F> Workload for F
where
    F: Fn(Intensity) -> Result<(), WorkloadError> + Send + Sync,
{
    fn run(&self, intensity: Intensity) -> Result<(), WorkloadError> {
        self(intensity)
    }
}

/// Sobel convolution over a square matrix.
#[derive(Clone, Debug)]
pub struct ConvolutionWorkload {
    size: usize,
    seed: u64,
}

impl ConvolutionWorkload {
    const KERNEL: [f32; 9] = [1.0, 0.0, -1.0, 2.0, 0.0, -2.0, 1.0, 0.0, -1.0];

    /// Create a workload over a `size` x `size` matrix.
    pub fn new(size: usize) -> Self {
        ConvolutionWorkload {
            size: size.max(3),
            seed: 0xdeadbeef,
        }
    }

    /// Run the convolution passes and return the accumulated sum.
    pub fn convolve(&self, intensity: Intensity) -> f32 {
        let size = self.size;
        let mut matrix = self.seeded_matrix();
        let mut output = vec![0.0f32; size * size];
        let mut result = 0.0f32;

        let passes = intensity.value();
        for pass in 0..passes {
            for i in 1..size - 1 {
                for j in 1..size - 1 {
                    let mut sum = 0.0f32;
                    for ki in 0..3 {
                        for kj in 0..3 {
                            let row = i + ki - 1;
                            let col = j + kj - 1;
                            sum += matrix[row * size + col] * Self::KERNEL[ki * 3 + kj];
                        }
                    }
                    output[i * size + j] = sum;
                    result += sum;
                }
            }

            if pass < passes - 1 {
                std::mem::swap(&mut matrix, &mut output);
            }
        }

        black_box(result)
    }

    /// Pseudo-random matrix in [0, 1) from a linear congruential generator.
    fn seeded_matrix(&self) -> Vec<f32> {
        let multiplier: u64 = 6364136223846793005;
        let increment: u64 = 1442695040888963407;
        let mut seed = self.seed;

        (0..self.size * self.size)
            .map(|_| {
                seed = seed.wrapping_mul(multiplier).wrapping_add(increment);
                ((seed >> 40) as f32) / ((1u64 << 24) as f32)
            })
            .collect()
    }
}

impl Default for ConvolutionWorkload {
    fn default() -> Self {
        ConvolutionWorkload::new(256)
    }
}

impl Workload for ConvolutionWorkload {
    fn run(&self, intensity: Intensity) -> Result<(), WorkloadError> {
        let result = self.convolve(intensity);
        if result.is_finite() {
            Ok(())
        } else {
            Err(WorkloadError::Failed(format!(
                "convolution diverged at intensity {}",
                intensity
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_bounds() {
        assert_eq!(Intensity::new(150).value(), 5);
        assert_eq!(Intensity::new(-3).value(), 1);
        assert_eq!(Intensity::new(4).value(), 4);
    }

    #[test]
    fn test_intensity_default() {
        assert_eq!(Intensity::default(), Intensity::MIN);
    }

    #[test]
    fn test_seeded_matrix_in_unit_range() {
        let workload = ConvolutionWorkload::new(16);
        let matrix = workload.seeded_matrix();
        assert_eq!(matrix.len(), 256);
        assert!(matrix.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_convolution_is_deterministic() {
        let workload = ConvolutionWorkload::new(32);
        let a = workload.convolve(Intensity::new(2));
        let b = workload.convolve(Intensity::new(2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_convolution_runs_at_every_intensity() {
        let workload = ConvolutionWorkload::new(32);
        for level in MIN_INTENSITY..=MAX_INTENSITY {
            assert!(workload.run(Intensity::new(level)).is_ok());
        }
    }

    #[test]
    fn test_closure_workload() {
        let failing =
            |_: Intensity| -> Result<(), WorkloadError> { Err(WorkloadError::Failed("nope".to_string())) };
        assert!(failing.run(Intensity::MIN).is_err());
    }
}

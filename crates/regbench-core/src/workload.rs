//! Random register operations.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regbench_transport::{AsyncTransport, Connection, RegisterKind, TransportResult};
use serde::{Deserialize, Serialize};

/// Inclusive register address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRange {
    /// First address
    pub start: u16,
    /// Last address
    pub end: u16,
}

impl RegisterRange {
    /// `start..=end`
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of addresses
    #[must_use]
    pub const fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as u32 + 1
        }
    }

    /// Whether the range holds no address
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kind of operation, as reported in statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Input register read
    ReadInput,
    /// Holding register read
    ReadHolding,
    /// Holding register write
    Write,
}

impl OperationKind {
    /// All kinds in report order
    pub const ALL: [Self; 3] = [Self::ReadInput, Self::ReadHolding, Self::Write];
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadInput => f.pad("read-input"),
            Self::ReadHolding => f.pad("read-holding"),
            Self::Write => f.pad("write"),
        }
    }
}

/// One generated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read input registers
    ReadInput {
        /// First register
        address: u16,
        /// Register count
        count: u16,
    },
    /// Read holding registers
    ReadHolding {
        /// First register
        address: u16,
        /// Register count
        count: u16,
    },
    /// Write holding registers
    Write {
        /// First register
        address: u16,
        /// Values, one per register
        values: Vec<u16>,
    },
}

impl Operation {
    /// Kind of this operation
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::ReadInput { .. } => OperationKind::ReadInput,
            Self::ReadHolding { .. } => OperationKind::ReadHolding,
            Self::Write { .. } => OperationKind::Write,
        }
    }

    /// First register addressed
    #[must_use]
    pub const fn address(&self) -> u16 {
        match self {
            Self::ReadInput { address, .. }
            | Self::ReadHolding { address, .. }
            | Self::Write { address, .. } => *address,
        }
    }

    /// Number of registers addressed
    #[must_use]
    pub fn count(&self) -> u16 {
        match self {
            Self::ReadInput { count, .. } | Self::ReadHolding { count, .. } => *count,
            Self::Write { values, .. } => values.len() as u16,
        }
    }

    /// Run the operation on a leased connection
    pub fn execute(&self, conn: &mut Connection) -> TransportResult<()> {
        match self {
            Self::ReadInput { address, count } => conn
                .read_registers(RegisterKind::Input, *address, *count)
                .map(|_| ()),
            Self::ReadHolding { address, count } => conn
                .read_registers(RegisterKind::Holding, *address, *count)
                .map(|_| ()),
            Self::Write { address, values } => conn.write_registers(*address, values),
        }
    }

    /// Run the operation on a shared cooperative session
    pub async fn execute_async(&self, transport: &dyn AsyncTransport) -> TransportResult<()> {
        match self {
            Self::ReadInput { address, count } => transport
                .read_registers(RegisterKind::Input, *address, *count)
                .await
                .map(|_| ()),
            Self::ReadHolding { address, count } => transport
                .read_registers(RegisterKind::Holding, *address, *count)
                .await
                .map(|_| ()),
            Self::Write { address, values } => transport.write_registers(*address, values).await,
        }
    }
}

/// Register ranges and per-request limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Input register addresses
    pub input_range: RegisterRange,
    /// Holding register addresses, used for reads and writes
    pub holding_range: RegisterRange,
    /// Registers per read
    pub max_per_read: u16,
    /// Registers per write
    pub max_per_write: u16,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            input_range: RegisterRange::new(0, 9),
            holding_range: RegisterRange::new(0, 999),
            max_per_read: 120,
            max_per_write: 120,
        }
    }
}

/// Uniform random operation source
#[derive(Debug)]
pub struct OperationGenerator {
    config: WorkloadConfig,
    rng: StdRng,
}

impl OperationGenerator {
    /// Create a generator; a fixed seed makes the sequence reproducible
    #[must_use]
    pub fn new(config: WorkloadConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Draw the next operation.
    ///
    /// The kind is uniform, the address uniform within the kind's range and
    /// the count uniform in `1..=max`, clamped so the request never runs past
    /// the end of the range.
    pub fn next_operation(&mut self) -> Operation {
        match self.rng.gen_range(0..3u8) {
            0 => {
                let (address, count) =
                    self.draw_span(self.config.input_range, self.config.max_per_read);
                Operation::ReadInput { address, count }
            }
            1 => {
                let (address, count) =
                    self.draw_span(self.config.holding_range, self.config.max_per_read);
                Operation::ReadHolding { address, count }
            }
            _ => {
                let (address, count) =
                    self.draw_span(self.config.holding_range, self.config.max_per_write);
                let values = (0..count).map(|_| self.rng.gen_range(0..=u16::MAX)).collect();
                Operation::Write { address, values }
            }
        }
    }

    fn draw_span(&mut self, range: RegisterRange, max: u16) -> (u16, u16) {
        let address = self.rng.gen_range(range.start..=range.end.max(range.start));
        let room = u32::from(range.end.max(address) - address) + 1;
        let limit = u32::from(max.max(1)).min(room) as u16;
        let count = self.rng.gen_range(1..=limit);
        (address, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        assert_eq!(RegisterRange::new(0, 9).len(), 10);
        assert_eq!(RegisterRange::new(5, 5).len(), 1);
        assert!(RegisterRange::new(6, 5).is_empty());
    }

    #[test]
    fn test_operations_stay_inside_ranges() {
        let config = WorkloadConfig::default();
        let mut generator = OperationGenerator::new(config.clone(), Some(7));

        for _ in 0..5_000 {
            let op = generator.next_operation();
            let range = match op.kind() {
                OperationKind::ReadInput => config.input_range,
                _ => config.holding_range,
            };
            let last = u32::from(op.address()) + u32::from(op.count()) - 1;
            assert!(op.count() >= 1);
            assert!(op.count() <= 120);
            assert!(op.address() >= range.start);
            assert!(last <= u32::from(range.end), "{op:?} runs past {range:?}");
        }
    }

    #[test]
    fn test_all_kinds_are_drawn() {
        let mut generator = OperationGenerator::new(WorkloadConfig::default(), Some(1));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..300 {
            seen.insert(generator.next_operation().kind());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let mut a = OperationGenerator::new(WorkloadConfig::default(), Some(42));
        let mut b = OperationGenerator::new(WorkloadConfig::default(), Some(42));
        for _ in 0..50 {
            assert_eq!(a.next_operation(), b.next_operation());
        }
    }

    #[test]
    fn test_single_register_range() {
        let config = WorkloadConfig {
            input_range: RegisterRange::new(3, 3),
            holding_range: RegisterRange::new(3, 3),
            ..WorkloadConfig::default()
        };
        let mut generator = OperationGenerator::new(config, Some(9));
        for _ in 0..100 {
            let op = generator.next_operation();
            assert_eq!((op.address(), op.count()), (3, 1));
        }
    }
}

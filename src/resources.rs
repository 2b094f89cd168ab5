// src/resources.rs

//! Typed resource quantities and the global resource envelope.
//!
//! - [`Cores`] is a fractional CPU count.
//! - [`Memory`] is a byte count with human-readable parsing (`"2g"`, `"512m"`).
//! - [`ResourceSet`] bundles what a single task asks for.
//! - [`TaskManagerResources`] is the engine-wide envelope that admitted tasks
//!   draw from and release back into.

use std::fmt;

/// Tolerance for fractional core arithmetic.
const CORES_EPSILON: f64 = 1e-9;

/// A (possibly fractional) number of CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Cores(pub f64);

impl Cores {
    pub fn none() -> Self {
        Cores(0.0)
    }

    /// Subtract, returning `None` if the result would go negative.
    pub fn checked_sub(self, other: Cores) -> Option<Cores> {
        let diff = self.0 - other.0;
        if diff < -CORES_EPSILON {
            None
        } else {
            Some(Cores(diff.max(0.0)))
        }
    }

    pub fn add(self, other: Cores) -> Cores {
        Cores(self.0 + other.0)
    }
}

impl fmt::Display for Cores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount of memory in bytes.
///
/// Parsing accepts case-insensitive base-1024 suffixes
/// (`k/kb/m/mb/g/gb/t/tb/p/pb`); an unsuffixed value is taken as bytes.
/// Unparseable input yields the sentinel value `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Memory(pub i64);

impl Memory {
    pub fn bytes(value: i64) -> Self {
        Memory(value)
    }

    pub fn none() -> Self {
        Memory(0)
    }

    /// Whether this value is a real byte count (parsing succeeded).
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Parse a memory string such as `"2g"`, `"512MB"` or `"1048576"`.
    pub fn parse(s: &str) -> Memory {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);

        let value: i64 = match digits.parse() {
            Ok(v) => v,
            Err(_) => return Memory(-1),
        };

        let exponent = match suffix.to_ascii_lowercase().as_str() {
            "" => 0,
            "k" | "kb" => 1,
            "m" | "mb" => 2,
            "g" | "gb" => 3,
            "t" | "tb" => 4,
            "p" | "pb" => 5,
            _ => return Memory(-1),
        };

        let mut bytes = value;
        for _ in 0..exponent {
            bytes = match bytes.checked_mul(1024) {
                Some(b) => b,
                None => return Memory(-1),
            };
        }
        Memory(bytes)
    }

    /// Render with the largest suffix that divides the value exactly, so that
    /// canonical inputs round-trip (`"2g"` parses and prints as `"2g"`).
    pub fn pretty_string(&self) -> String {
        if self.0 < 0 {
            return self.0.to_string();
        }
        const SUFFIXES: [&str; 6] = ["", "k", "m", "g", "t", "p"];
        let mut value = self.0;
        let mut unit = 0usize;
        while unit < SUFFIXES.len() - 1 && value >= 1024 && value % 1024 == 0 {
            value /= 1024;
            unit += 1;
        }
        format!("{}{}", value, SUFFIXES[unit])
    }

    pub fn checked_sub(self, other: Memory) -> Option<Memory> {
        let diff = self.0 - other.0;
        if diff < 0 {
            None
        } else {
            Some(Memory(diff))
        }
    }

    pub fn add(self, other: Memory) -> Memory {
        Memory(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_string())
    }
}

/// The resources a single task occupies while running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSet {
    pub cores: Cores,
    pub memory: Memory,
    pub disk: Memory,
}

impl ResourceSet {
    pub fn new(cores: Cores, memory: Memory, disk: Memory) -> Self {
        Self {
            cores,
            memory,
            disk,
        }
    }

    /// A request for no resources at all.
    pub fn empty() -> Self {
        Self {
            cores: Cores::none(),
            memory: Memory::none(),
            disk: Memory::none(),
        }
    }

    pub fn with(cores: f64, memory: Memory) -> Self {
        Self {
            cores: Cores(cores),
            memory,
            disk: Memory::none(),
        }
    }

    /// Componentwise subtraction, defined only when every component stays
    /// non-negative.
    pub fn checked_sub(&self, other: &ResourceSet) -> Option<ResourceSet> {
        Some(ResourceSet {
            cores: self.cores.checked_sub(other.cores)?,
            memory: self.memory.checked_sub(other.memory)?,
            disk: self.disk.checked_sub(other.disk)?,
        })
    }

    pub fn add(&self, other: &ResourceSet) -> ResourceSet {
        ResourceSet {
            cores: self.cores.add(other.cores),
            memory: self.memory.add(other.memory),
            disk: self.disk.add(other.disk),
        }
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cores={} memory={} disk={}",
            self.cores, self.memory, self.disk
        )
    }
}

/// Which envelope memory pool a task draws from.
///
/// Process tasks consume system memory; in-process callbacks consume the
/// engine's own memory budget. Cores are shared between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPool {
    System,
    InProcess,
}

/// The global resource envelope the engine may allocate concurrently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskManagerResources {
    pub cores: Cores,
    pub system_memory: Memory,
    pub in_process_memory: Memory,
}

impl TaskManagerResources {
    pub fn new(cores: Cores, system_memory: Memory, in_process_memory: Memory) -> Self {
        Self {
            cores,
            system_memory,
            in_process_memory,
        }
    }

    /// An effectively unbounded envelope, for tests and trivial workflows.
    pub fn infinite() -> Self {
        Self {
            cores: Cores(f64::MAX),
            system_memory: Memory(i64::MAX),
            in_process_memory: Memory(i64::MAX),
        }
    }

    /// The envelope seen by a task drawing from the given pool, as a
    /// [`ResourceSet`]. Disk is not budgeted and reads as unbounded.
    pub fn view(&self, pool: MemoryPool) -> ResourceSet {
        ResourceSet {
            cores: self.cores,
            memory: match pool {
                MemoryPool::System => self.system_memory,
                MemoryPool::InProcess => self.in_process_memory,
            },
            disk: Memory(i64::MAX),
        }
    }

    /// Reserve `rs` out of this envelope against the given pool. Disk is
    /// ignored. `None` if it does not fit.
    pub fn checked_sub(&self, rs: &ResourceSet, pool: MemoryPool) -> Option<TaskManagerResources> {
        let cores = self.cores.checked_sub(rs.cores)?;
        let mut out = TaskManagerResources { cores, ..*self };
        match pool {
            MemoryPool::System => out.system_memory = self.system_memory.checked_sub(rs.memory)?,
            MemoryPool::InProcess => {
                out.in_process_memory = self.in_process_memory.checked_sub(rs.memory)?
            }
        }
        Some(out)
    }
}

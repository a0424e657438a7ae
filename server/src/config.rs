//! Server configuration: which engine to run and how.

use std::time::Duration;

use qlserve_types::{EngineError, HeapFlags, MemoryBudget, RamPolicy};

/// Executable looked up in `PATH` when nothing else is configured.
pub const DEFAULT_EXECUTABLE: &str = "codeql";

/// Deadline for a single engine command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Baseline arguments that put the engine in command-server mode.
pub const CLI_SERVER_ARGS: [&str; 2] = ["execute", "cli-server"];

/// How to launch and drive the engine.
///
/// Heap flags are passed only when a memory budget is set. Without one the
/// engine is launched with [`CLI_SERVER_ARGS`] and the extra arguments alone
/// and sizes its own heaps.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    executable: String,
    extra_args: Vec<String>,
    ram_policy: RamPolicy,
    memory_budget: Option<MemoryBudget>,
    command_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTABLE)
    }
}

impl ServerConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            extra_args: Vec::new(),
            ram_policy: RamPolicy::DEFAULT,
            memory_budget: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Arguments passed to the engine after [`CLI_SERVER_ARGS`].
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Set the split policy used for the memory budget, whenever that is set.
    ///
    /// Fails if an already configured budget cannot be split under `policy`.
    pub fn with_ram_policy(mut self, policy: RamPolicy) -> Result<Self, EngineError> {
        if let Some(budget) = self.memory_budget {
            policy.split(budget)?;
        }
        self.ram_policy = policy;
        Ok(self)
    }

    /// Launch the engine with heap flags derived from `total_mb`.
    pub fn with_memory_budget(mut self, total_mb: i64) -> Result<Self, EngineError> {
        let budget = MemoryBudget::new(total_mb)?;
        self.ram_policy.split(budget)?;
        self.memory_budget = Some(budget);
        Ok(self)
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Result<Self, EngineError> {
        if timeout.is_zero() {
            return Err(EngineError::invalid_configuration(
                "command timeout must be greater than zero",
            ));
        }
        self.command_timeout = timeout;
        Ok(self)
    }

    #[must_use]
    pub fn executable(&self) -> &str {
        &self.executable
    }

    #[must_use]
    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    #[must_use]
    pub fn ram_policy(&self) -> RamPolicy {
        self.ram_policy
    }

    #[must_use]
    pub fn memory_budget(&self) -> Option<MemoryBudget> {
        self.memory_budget
    }

    /// The configured budget split under the current policy.
    #[must_use]
    pub fn heap_flags(&self) -> Option<HeapFlags> {
        // Both setters reject budgets the policy cannot split.
        self.memory_budget
            .and_then(|budget| self.ram_policy.split(budget).ok())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Full argument list for the engine process.
    #[must_use]
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = CLI_SERVER_ARGS.iter().map(ToString::to_string).collect();
        args.extend(self.extra_args.iter().cloned());
        if let Some(flags) = self.heap_flags() {
            args.extend(flags.as_args());
        }
        args
    }
}

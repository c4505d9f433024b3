//! External tool configuration
//!
//! Names or paths of the binaries snipbox drives, the language standards it
//! compiles against, and how long a tool may run.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ConfigError;
use crate::job::{Compiler, Language};

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_gcc")]
    pub gcc: String,

    #[serde(default = "default_gxx")]
    pub gxx: String,

    #[serde(default = "default_clang")]
    pub clang: String,

    #[serde(default = "default_clangxx")]
    pub clangxx: String,

    #[serde(default = "default_clang_format")]
    pub clang_format: String,

    #[serde(default = "default_cppcheck")]
    pub cppcheck: String,

    #[serde(default = "default_valgrind")]
    pub valgrind: String,

    #[serde(default = "default_gdb")]
    pub gdb: String,

    #[serde(default = "default_strace")]
    pub strace: String,

    /// `-std=` value for C sources
    #[serde(default = "default_c_standard")]
    pub c_standard: String,

    /// `-std=` value for C++ sources
    #[serde(default = "default_cpp_standard")]
    pub cpp_standard: String,

    /// clang-format `--style` value
    #[serde(default = "default_format_style")]
    pub format_style: String,

    /// Wall clock seconds for compilers, formatters and linters
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: f64,

    /// Wall clock seconds for valgrind, gdb and strace
    #[serde(default = "default_interactive_timeout")]
    pub interactive_timeout: f64,
}

impl ToolsConfig {
    /// Compiler driver for a language and compiler family
    pub fn compiler(&self, language: Language, compiler: Compiler) -> &str {
        match (language, compiler) {
            (Language::C, Compiler::Gcc) => &self.gcc,
            (Language::Cpp, Compiler::Gcc) => &self.gxx,
            (Language::C, Compiler::Clang) => &self.clang,
            (Language::Cpp, Compiler::Clang) => &self.clangxx,
        }
    }

    /// Language standard for a language
    pub fn standard(&self, language: Language) -> &str {
        match language {
            Language::C => &self.c_standard,
            Language::Cpp => &self.cpp_standard,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tool_timeout)
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.interactive_timeout)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("gcc", &self.gcc),
            ("gxx", &self.gxx),
            ("clang", &self.clang),
            ("clangxx", &self.clangxx),
            ("clang_format", &self.clang_format),
            ("cppcheck", &self.cppcheck),
            ("valgrind", &self.valgrind),
            ("gdb", &self.gdb),
            ("strace", &self.strace),
            ("c_standard", &self.c_standard),
            ("cpp_standard", &self.cpp_standard),
            ("format_style", &self.format_style),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("tools.{name} is empty")));
            }
        }
        if self.tool_timeout <= 0.0 || self.interactive_timeout <= 0.0 {
            return Err(ConfigError::Invalid(
                "tool timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            gcc: default_gcc(),
            gxx: default_gxx(),
            clang: default_clang(),
            clangxx: default_clangxx(),
            clang_format: default_clang_format(),
            cppcheck: default_cppcheck(),
            valgrind: default_valgrind(),
            gdb: default_gdb(),
            strace: default_strace(),
            c_standard: default_c_standard(),
            cpp_standard: default_cpp_standard(),
            format_style: default_format_style(),
            tool_timeout: default_tool_timeout(),
            interactive_timeout: default_interactive_timeout(),
        }
    }
}

fn default_gcc() -> String {
    "gcc".to_string()
}

fn default_gxx() -> String {
    "g++".to_string()
}

fn default_clang() -> String {
    "clang".to_string()
}

fn default_clangxx() -> String {
    "clang++".to_string()
}

fn default_clang_format() -> String {
    "clang-format".to_string()
}

fn default_cppcheck() -> String {
    "cppcheck".to_string()
}

fn default_valgrind() -> String {
    "valgrind".to_string()
}

fn default_gdb() -> String {
    "gdb".to_string()
}

fn default_strace() -> String {
    "strace".to_string()
}

fn default_c_standard() -> String {
    "c17".to_string()
}

fn default_cpp_standard() -> String {
    "c++17".to_string()
}

fn default_format_style() -> String {
    "LLVM".to_string()
}

fn default_tool_timeout() -> f64 {
    15.0
}

fn default_interactive_timeout() -> f64 {
    30.0
}

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::csr::CsrWidth;
use crate::debug::DebugRegisters;

/// Information about a LiteX SoC, mainly the addresses of all its CSRs.
///
/// Generate it by passing `--csr-json <filename>` (or `--soc-json`) when
/// building the SoC, then parse the file into this struct. Etherbone talks to
/// the SoC's main bus, so every address in here can be used as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocInfo {
    /// A map from the name of every LiteX module that has CSRs to the address
    /// where those CSRs start.
    pub csr_bases: HashMap<String, u32>,
    /// A map from the name of every CSR in the SoC to information about it.
    ///
    /// Names are `<module>_<submodule1>_..._<csr>`, so the VexRiscv debug
    /// bridge's counter shows up as e.g. `riscv_debug_counter`.
    pub csr_registers: HashMap<String, CsrInfo>,
    /// A map from the names of constants about the SoC to their values.
    ///
    /// `None` is used for boolean constants: not being in the map means
    /// `false`, and `None` means `true`, similar to `#define`s in C.
    pub constants: HashMap<String, Option<SocConstant>>,
    /// A map from the names of regions of the SoC's memory to info about them.
    pub memories: HashMap<String, MemoryRegion>,
}

/// Information about an individual CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsrInfo {
    /// The address of the register on the SoC's main bus.
    pub addr: u32,
    /// How many bus words the CSR takes up, in units of
    /// [`SocInfo::csr_width`].
    pub size: u32,
    /// Whether the CSR is read-only or read-write.
    #[serde(rename = "type")]
    pub kind: CsrKind,
}

/// Whether a CSR is read-only or read-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsrKind {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Display for CsrKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CsrKind::ReadOnly => f.pad("read-only"),
            CsrKind::ReadWrite => f.pad("read-write"),
        }
    }
}

/// The value of a constant about an SoC, which can either be a string or an
/// integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocConstant {
    String(String),
    // LiteX also exposes these through C getters returning `int`.
    Integer(i32),
}

/// Information about a region of the SoC's memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: u32,
    /// The size of the memory region, in bytes.
    pub size: u32,
    /// `"cached"` or `"io"`, possibly with `+linker` added onto the end.
    #[serde(rename = "type")]
    pub kind: String,
}

impl SocInfo {
    /// The base address of the SoC's CSR region.
    pub fn csr_base(&self) -> Result<u32, crate::Error> {
        match self.memories.get("csr") {
            Some(region) => Ok(region.base),
            None => Err(crate::Error::NoCsrRegion),
        }
    }

    /// Look up a CSR's address by its full name.
    pub fn csr_addr(&self, name: &str) -> Result<u32, crate::Error> {
        self.csr_registers
            .get(name)
            .map(|info| info.addr)
            .ok_or_else(|| crate::Error::MissingCsr(name.to_owned()))
    }

    /// The CSR bus data width the SoC was built with.
    ///
    /// LiteX leaves `config_csr_data_width` out when it's the default of 8.
    pub fn csr_width(&self) -> Result<CsrWidth, crate::Error> {
        match self.constants.get("config_csr_data_width") {
            None | Some(None) => Ok(CsrWidth::Bits8),
            Some(Some(SocConstant::Integer(bits))) => u32::try_from(*bits)
                .ok()
                .and_then(CsrWidth::from_bits)
                .ok_or_else(|| crate::Error::UnsupportedCsrWidth(bits.to_string())),
            Some(Some(SocConstant::String(s))) => s
                .parse::<u32>()
                .ok()
                .and_then(CsrWidth::from_bits)
                .ok_or_else(|| crate::Error::UnsupportedCsrWidth(s.clone())),
        }
    }

    /// Find the CPU debug bridge's CSRs, named `<prefix>_core`,
    /// `<prefix>_data`, `<prefix>_sync` and `<prefix>_counter`.
    pub fn debug_registers(&self, prefix: &str) -> Result<DebugRegisters, crate::Error> {
        let csr = |suffix: &str| self.csr_addr(&format!("{prefix}_{suffix}"));
        Ok(DebugRegisters {
            core: csr("core")?,
            data: csr("data")?,
            sync: csr("sync")?,
            counter: csr("counter")?,
        })
    }
}

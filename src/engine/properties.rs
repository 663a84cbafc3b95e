//! Positional engine property table
//!
//! Writer and reader agree on properties by index only. The table always
//! carries [`PROPERTY_COUNT`] slots; slot 0 is unused by the engine and is
//! stored as whatever the engine reports for it.

use std::io::{self, Read, Write};

use crate::codec::{read_varint, write_varint};
use crate::util::config::EngineOptions;

use super::{EngineError, EngineResult, ScriptEngine};

/// Number of slots in a property table.
pub const PROPERTY_COUNT: usize = 41;

/// Engine properties, numbered as the VM numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineProperty {
    AllowUnsafeReferences = 1,
    OptimizeBytecode = 2,
    CopyScriptSections = 3,
    MaxStackSize = 4,
    UseCharacterLiterals = 5,
    AllowMultilineStrings = 6,
    AllowImplicitHandleTypes = 7,
    BuildWithoutLineCues = 8,
    InitGlobalVarsAfterBuild = 9,
    RequireEnumScope = 10,
    ScriptScanner = 11,
    IncludeJitInstructions = 12,
    StringEncoding = 13,
    PropertyAccessorMode = 14,
    ExpandDefaultArrayToTemplate = 15,
    AutoGarbageCollect = 16,
    DisallowGlobalVars = 17,
    AlwaysImplDefaultConstruct = 18,
    CompilerWarnings = 19,
    DisallowValueAssignForRefType = 20,
    AlterSyntaxNamedArgs = 21,
    DisableIntegerDivision = 22,
    DisallowEmptyListElements = 23,
    PrivatePropAsProtected = 24,
    AllowUnicodeIdentifiers = 25,
    HeredocTrimMode = 26,
    MaxNestedCalls = 27,
    GenericCallMode = 28,
    InitStackSize = 29,
    InitCallStackSize = 30,
    MaxCallStackSize = 31,
    IgnoreDuplicateSharedInterface = 32,
    NoDebugOutput = 33,
    DisableScriptClassGc = 34,
    JitInterfaceVersion = 35,
    AlwaysImplDefaultCopy = 36,
    AlwaysImplDefaultCopyConstruct = 37,
    MemberInitMode = 38,
    BoolConversionMode = 39,
    ForeachSupport = 40,
}

impl EngineProperty {
    pub const ALL: [EngineProperty; PROPERTY_COUNT - 1] = [
        EngineProperty::AllowUnsafeReferences,
        EngineProperty::OptimizeBytecode,
        EngineProperty::CopyScriptSections,
        EngineProperty::MaxStackSize,
        EngineProperty::UseCharacterLiterals,
        EngineProperty::AllowMultilineStrings,
        EngineProperty::AllowImplicitHandleTypes,
        EngineProperty::BuildWithoutLineCues,
        EngineProperty::InitGlobalVarsAfterBuild,
        EngineProperty::RequireEnumScope,
        EngineProperty::ScriptScanner,
        EngineProperty::IncludeJitInstructions,
        EngineProperty::StringEncoding,
        EngineProperty::PropertyAccessorMode,
        EngineProperty::ExpandDefaultArrayToTemplate,
        EngineProperty::AutoGarbageCollect,
        EngineProperty::DisallowGlobalVars,
        EngineProperty::AlwaysImplDefaultConstruct,
        EngineProperty::CompilerWarnings,
        EngineProperty::DisallowValueAssignForRefType,
        EngineProperty::AlterSyntaxNamedArgs,
        EngineProperty::DisableIntegerDivision,
        EngineProperty::DisallowEmptyListElements,
        EngineProperty::PrivatePropAsProtected,
        EngineProperty::AllowUnicodeIdentifiers,
        EngineProperty::HeredocTrimMode,
        EngineProperty::MaxNestedCalls,
        EngineProperty::GenericCallMode,
        EngineProperty::InitStackSize,
        EngineProperty::InitCallStackSize,
        EngineProperty::MaxCallStackSize,
        EngineProperty::IgnoreDuplicateSharedInterface,
        EngineProperty::NoDebugOutput,
        EngineProperty::DisableScriptClassGc,
        EngineProperty::JitInterfaceVersion,
        EngineProperty::AlwaysImplDefaultCopy,
        EngineProperty::AlwaysImplDefaultCopyConstruct,
        EngineProperty::MemberInitMode,
        EngineProperty::BoolConversionMode,
        EngineProperty::ForeachSupport,
    ];

    /// Slot of this property in a table.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Value a freshly created engine reports.
    pub const fn default_value(self) -> u64 {
        match self {
            EngineProperty::OptimizeBytecode
            | EngineProperty::CopyScriptSections
            | EngineProperty::InitGlobalVarsAfterBuild
            | EngineProperty::ScriptScanner
            | EngineProperty::AutoGarbageCollect
            | EngineProperty::CompilerWarnings
            | EngineProperty::GenericCallMode
            | EngineProperty::HeredocTrimMode
            | EngineProperty::JitInterfaceVersion
            | EngineProperty::MemberInitMode
            | EngineProperty::ForeachSupport => 1,
            EngineProperty::PropertyAccessorMode => 3,
            EngineProperty::MaxNestedCalls => 100,
            EngineProperty::InitStackSize => 4096,
            EngineProperty::InitCallStackSize => 10,
            _ => 0,
        }
    }
}

/// Snapshot of every engine property, in slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePropertyTable {
    values: Vec<u64>,
}

impl EnginePropertyTable {
    /// A table of `count` zeroed slots.
    pub fn zeroed(count: usize) -> Self {
        Self {
            values: vec![0; count],
        }
    }

    pub fn from_values(values: Vec<u64>) -> Self {
        Self { values }
    }

    /// The values a freshly created engine reports.
    pub fn baseline() -> Self {
        let mut table = Self::zeroed(PROPERTY_COUNT);
        for prop in EngineProperty::ALL {
            table.set(prop, prop.default_value());
        }
        table
    }

    /// Baseline adjusted the way the packer configures its engine, then
    /// overlaid with the `scripting` options.
    pub fn from_options(
        options: &EngineOptions,
        debug: bool,
    ) -> Self {
        let mut table = Self::baseline();
        table.set(EngineProperty::AllowUnsafeReferences, 1);
        table.set(EngineProperty::InitGlobalVarsAfterBuild, 0);
        table.set(EngineProperty::BuildWithoutLineCues, u64::from(!debug));
        options.apply_to(&mut table);
        table
    }

    /// Read every property the engine exposes.
    pub fn capture<E: ScriptEngine + ?Sized>(engine: &E) -> Self {
        Self {
            values: (0..engine.property_count())
                .map(|i| engine.property(i))
                .collect(),
        }
    }

    /// Push every slot back onto `engine`, refusing tables whose length
    /// disagrees with what the engine expects.
    pub fn apply<E: ScriptEngine + ?Sized>(
        &self,
        engine: &mut E,
    ) -> EngineResult<()> {
        let expected = engine.property_count();
        if expected != self.values.len() {
            return Err(EngineError::PropertyCount {
                expected,
                found: self.values.len(),
            });
        }
        for (index, &value) in self.values.iter().enumerate() {
            engine.set_property(index, value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn get(
        &self,
        prop: EngineProperty,
    ) -> u64 {
        self.values.get(prop.index()).copied().unwrap_or(0)
    }

    pub fn set(
        &mut self,
        prop: EngineProperty,
        value: u64,
    ) {
        let index = prop.index();
        if index >= self.values.len() {
            self.values.resize(index + 1, 0);
        }
        self.values[index] = value;
    }

    /// Encode every slot as a varint. The count itself is not stored.
    pub fn write_to<W: Write + ?Sized>(
        &self,
        writer: &mut W,
    ) -> io::Result<()> {
        for &value in &self.values {
            write_varint(writer, value)?;
        }
        Ok(())
    }

    /// Decode exactly `count` slots.
    pub fn read_from<R: Read + ?Sized>(
        reader: &mut R,
        count: usize,
    ) -> io::Result<Self> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(read_varint(reader)?);
        }
        Ok(Self { values })
    }
}

impl Default for EnginePropertyTable {
    fn default() -> Self {
        Self::baseline()
    }
}

//! Error types for flowmap.
//!
//! Construction-time failures ([`SimulationError`]) are returned to the caller
//! and leave no partially built session behind. Per-frame submission failures
//! ([`StepError`]) are recovered inside the simulator by keeping the previous
//! frame, so they never escape [`Simulator::step`](crate::Simulator::step).

use std::fmt;

/// Errors that can occur while acquiring a GPU device.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map a buffer for reading.
    BufferMapping(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors that can occur while building or inspecting a simulation session.
#[derive(Debug)]
pub enum SimulationError {
    /// A field's buffers could not be allocated (device limits exceeded or out of memory).
    ResourceExhausted {
        field: String,
        width: u32,
        height: u32,
        limit: u32,
    },
    /// The declared dependencies contain a cycle between distinct fields.
    CyclicGraphUnsupportedAsOrdering {
        /// Field names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },
    /// A dependency named a field that was never declared.
    UnknownField(String),
    /// Two fields were declared with the same name.
    DuplicateField(String),
    /// An edge was declared after the graph was finalized.
    GraphFinalized,
    /// A session needs at least one field.
    NoFields,
    /// The explicit default image does not match the field resolution.
    DefaultStateMismatch {
        field: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Texels written to a field do not cover its resolution exactly.
    TexelCountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    /// An image written to a field has a different size than the field.
    ImageSizeMismatch {
        field: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The device rejected the program generated for a field's update rule.
    InvalidRule { field: String, message: String },
    /// GPU initialization failed.
    Gpu(GpuError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::ResourceExhausted { field, width, height, limit } => write!(
                f,
                "Cannot allocate {}x{} buffers for field '{}' (device limit {})",
                width, height, field, limit
            ),
            SimulationError::CyclicGraphUnsupportedAsOrdering { cycle } => write!(
                f,
                "Field dependencies form a cycle with no evaluation order: {}",
                cycle.join(" -> ")
            ),
            SimulationError::UnknownField(name) => write!(f, "Unknown field '{}'", name),
            SimulationError::DuplicateField(name) => write!(f, "Field '{}' is declared twice", name),
            SimulationError::GraphFinalized => {
                write!(f, "Dependencies cannot be declared after the graph is finalized")
            }
            SimulationError::NoFields => write!(f, "A simulation needs at least one field. Use .with_field() to add one."),
            SimulationError::DefaultStateMismatch { field, expected, actual } => write!(
                f,
                "Default image for field '{}' is {}x{}, expected {}x{}",
                field, actual.0, actual.1, expected.0, expected.1
            ),
            SimulationError::TexelCountMismatch { field, expected, actual } => write!(
                f,
                "Field '{}' holds {} texels, got {}",
                field, expected, actual
            ),
            SimulationError::ImageSizeMismatch { field, expected, actual } => write!(
                f,
                "Image written to field '{}' is {}x{}, expected {}x{}",
                field, actual.0, actual.1, expected.0, expected.1
            ),
            SimulationError::InvalidRule { field, message } => {
                write!(f, "Update rule for field '{}' was rejected: {}", field, message)
            }
            SimulationError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for SimulationError {
    fn from(e: GpuError) -> Self {
        SimulationError::Gpu(e)
    }
}

/// Runtime failure of a single field's compute submission.
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// The device rejected or lost the submitted work.
    SubmissionFailed(String),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::SubmissionFailed(msg) => write!(f, "Compute submission failed: {}", msg),
        }
    }
}

impl std::error::Error for StepError {}

/// Errors that can occur when loading or saving settings.
#[derive(Debug)]
pub enum SettingsError {
    /// Failed to read or write the settings file.
    Io(std::io::Error),
    /// The file is not valid settings JSON.
    Json(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Failed to access settings file: {}", e),
            SettingsError::Json(e) => write!(f, "Invalid settings JSON: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Json(e)
    }
}

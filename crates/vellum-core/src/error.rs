// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the hierarchy of error types for the device layer.
//!
//! Contract violations (unset handles, marker imbalance, incomplete
//! framebuffers) are not represented here: they panic, because they mean the
//! requested/resident state machine is already corrupt.

use crate::desc::{ShaderStage, TextureFormat};
use crate::handle::Handle;
use std::fmt;

/// An error reported by a native backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The native shader compiler rejected the source.
    Compilation(String),
    /// The native linker rejected a shader combination.
    Link(String),
    /// The backend does not implement the requested feature or format.
    Unsupported(String),
    /// A native object id was not found.
    UnknownId(String),
    /// A native allocation failed.
    OutOfMemory,
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::Compilation(log) => write!(f, "Native compilation failed: {log}"),
            NativeError::Link(log) => write!(f, "Native link failed: {log}"),
            NativeError::Unsupported(what) => write!(f, "Unsupported by backend: {what}"),
            NativeError::UnknownId(what) => write!(f, "Unknown native object: {what}"),
            NativeError::OutOfMemory => write!(f, "Native allocation failed: out of memory"),
            NativeError::Backend(msg) => write!(f, "Backend error: {msg}"),
        }
    }
}

impl std::error::Error for NativeError {}

/// An error related to shader compilation or program linkage.
#[derive(Debug)]
pub enum ShaderError {
    /// A shader failed to compile.
    Compilation {
        /// Slot the shader was created in.
        slot: Handle,
        /// Stage it was compiled for.
        stage: ShaderStage,
        /// Native diagnostic text.
        details: String,
    },
    /// A program failed to link.
    Link {
        /// Vertex (or stream-out) shader slot.
        vs: Handle,
        /// Pixel shader slot.
        ps: Handle,
        /// Native diagnostic text.
        details: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::Compilation {
                slot,
                stage,
                details,
            } => write!(
                f,
                "Shader compilation failed for {stage:?} shader {slot}: {details}"
            ),
            ShaderError::Link { vs, ps, details } => {
                write!(f, "Program link failed for ({vs}, {ps}): {details}")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or management of a resource.
#[derive(Debug)]
pub enum ResourceError {
    /// The texture format is not supported by this device.
    UnsupportedFormat(TextureFormat),
    /// A feature the request depends on is not supported by this device.
    UnsupportedFeature(String),
    /// The native backend failed to create or update a resource.
    Native {
        /// Slot of the resource being created or updated.
        slot: Handle,
        /// Native error.
        source: NativeError,
    },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::UnsupportedFormat(format) => {
                write!(f, "Texture format {format:?} is not supported by this device")
            }
            ResourceError::UnsupportedFeature(what) => {
                write!(f, "Feature not supported by this device: {what}")
            }
            ResourceError::Native { slot, source } => {
                write!(f, "Native failure on resource {slot}: {source}")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Native { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A general error for device operations.
#[derive(Debug)]
pub enum DeviceError {
    /// A shader or program error.
    Shader(ShaderError),
    /// A resource error.
    Resource(ResourceError),
    /// A native failure outside resource creation (draws, present, read-back).
    Native(NativeError),
    /// The other end of the command queue has been dropped.
    Disconnected,
    /// Waiting for the drained signal timed out.
    Timeout,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Shader(err) => write!(f, "Shader error: {err}"),
            DeviceError::Resource(err) => write!(f, "Resource error: {err}"),
            DeviceError::Native(err) => write!(f, "Native error: {err}"),
            DeviceError::Disconnected => write!(f, "Command queue disconnected"),
            DeviceError::Timeout => write!(f, "Timed out waiting for the command queue"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Shader(err) => Some(err),
            DeviceError::Resource(err) => Some(err),
            DeviceError::Native(err) => Some(err),
            DeviceError::Disconnected | DeviceError::Timeout => None,
        }
    }
}

impl From<ShaderError> for DeviceError {
    fn from(err: ShaderError) -> Self {
        DeviceError::Shader(err)
    }
}

impl From<ResourceError> for DeviceError {
    fn from(err: ResourceError) -> Self {
        DeviceError::Resource(err)
    }
}

impl From<NativeError> for DeviceError {
    fn from(err: NativeError) -> Self {
        DeviceError::Native(err)
    }
}

//! Model module for the transfer-learning backbones
//!
//! This module provides:
//! - Burn implementations of the four supported backbone families
//! - `CoffeeClassifier`, one module type that wraps any of them
//! - `ModelConfig`, which builds a classifier and optionally loads
//!   pretrained ImageNet weights before swapping the head
//!
//! ## Supported architectures
//!
//! | Name              | Head replaced    |
//! |-------------------|------------------|
//! | `resnet50`        | `fc`             |
//! | `efficientnet_b0` | `classifier[1]`  |
//! | `efficientnet_b2` | `classifier[1]`  |
//! | `mobilenet_v3`    | `classifier[3]`  |
//! | `convnext_tiny`   | `classifier[2]`  |

pub mod classifier;
pub mod config;
pub mod convnext;
pub mod efficientnet;
pub mod layers;
pub mod mobilenet;
pub mod resnet;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use classifier::CoffeeClassifier;
pub use config::ModelConfig;

use crate::utils::error::CoffeeDefectError;

/// Output width of the ImageNet heads the pretrained weights come with
pub const IMAGENET_CLASSES: usize = 1000;

/// The closed set of backbones a run can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "resnet50")]
    ResNet50,
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
    #[serde(rename = "efficientnet_b2")]
    EfficientNetB2,
    #[serde(rename = "mobilenet_v3")]
    MobileNetV3,
    #[serde(rename = "convnext_tiny")]
    ConvNextTiny,
}

impl Architecture {
    pub const ALL: [Architecture; 5] = [
        Architecture::ResNet50,
        Architecture::EfficientNetB0,
        Architecture::EfficientNetB2,
        Architecture::MobileNetV3,
        Architecture::ConvNextTiny,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Architecture::ResNet50 => "resnet50",
            Architecture::EfficientNetB0 => "efficientnet_b0",
            Architecture::EfficientNetB2 => "efficientnet_b2",
            Architecture::MobileNetV3 => "mobilenet_v3",
            Architecture::ConvNextTiny => "convnext_tiny",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = CoffeeDefectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.name() == s)
            .ok_or_else(|| CoffeeDefectError::Config(format!("Unknown model: {}", s)))
    }
}

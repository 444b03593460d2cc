/*!
 # Board identification

 Maps the DMI board vendor/name pair onto one of the supported handheld
 models. The lookup is exact: a board that is not listed is unsupported.
*/

use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

use crate::{Error, Result};

const BOARD_VENDOR: &str = "AYANEO";
const DMI_PATH: &str = "/sys/class/dmi/id";

/// Supported handheld models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Air,
    Air1s,
    Air1sLimited,
    AirPlus,
    AirPlusMendo,
    AirPro,
    Ayaneo2,
    Ayaneo2s,
    Geek,
    Geek1s,
    Kun,
    Slide,
}

/// Which LED controller protocol a model speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// LED controller embedded in or driven through the ACPI EC
    Legacy,
    /// Dedicated LED microcontroller reached through shared EC RAM
    Modern,
}

/// DMI board name for every model
const BOARD_NAMES: [(&str, Model); 12] = [
    ("AIR", Model::Air),
    ("AIR 1S", Model::Air1s),
    ("AIR 1S Limited", Model::Air1sLimited),
    ("AB05-AMD", Model::AirPlus),
    ("AB05-Mendocino", Model::AirPlusMendo),
    ("AIR Pro", Model::AirPro),
    ("AYANEO 2", Model::Ayaneo2),
    ("AYANEO 2S", Model::Ayaneo2s),
    ("GEEK", Model::Geek),
    ("GEEK 1S", Model::Geek1s),
    ("AYANEO KUN", Model::Kun),
    ("AS01", Model::Slide),
];

impl Model {
    /// Every supported model
    pub const ALL: [Model; 12] = [
        Model::Air,
        Model::Air1s,
        Model::Air1sLimited,
        Model::AirPlus,
        Model::AirPlusMendo,
        Model::AirPro,
        Model::Ayaneo2,
        Model::Ayaneo2s,
        Model::Geek,
        Model::Geek1s,
        Model::Kun,
        Model::Slide,
    ];

    /// Resolves a board to a model
    pub fn from_board(board: &BoardIdentity) -> Result<Model> {
        if board.vendor != BOARD_VENDOR {
            return Err(board.unsupported());
        }

        BOARD_NAMES
            .iter()
            .find(|(name, _)| *name == board.name)
            .map(|&(_, model)| model)
            .ok_or_else(|| board.unsupported())
    }

    /// Get the model name as string
    pub fn name(&self) -> &'static str {
        match self {
            Model::Air => "AIR",
            Model::Air1s => "AIR 1S",
            Model::Air1sLimited => "AIR 1S Limited",
            Model::AirPlus => "AIR Plus",
            Model::AirPlusMendo => "AIR Plus (Mendocino)",
            Model::AirPro => "AIR Pro",
            Model::Ayaneo2 => "AYANEO 2",
            Model::Ayaneo2s => "AYANEO 2S",
            Model::Geek => "GEEK",
            Model::Geek1s => "GEEK 1S",
            Model::Kun => "KUN",
            Model::Slide => "Slide",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// DMI board vendor and name as reported by firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    pub vendor: String,
    pub name: String,
}

impl BoardIdentity {
    pub fn new(vendor: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
        }
    }

    /// Reads the identity of the running machine
    pub fn from_sysfs() -> Result<Self> {
        Self::from_dir(DMI_PATH)
    }

    /// Reads `board_vendor` and `board_name` from a DMI id directory
    #[instrument(skip(dir))]
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let vendor = fs::read_to_string(dir.join("board_vendor"))?;
        let name = fs::read_to_string(dir.join("board_name"))?;
        let board = Self::new(vendor.trim(), name.trim());
        debug!("Board identity: {:?}", board);
        Ok(board)
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedModel {
            vendor: self.vendor.clone(),
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_board_names() {
        let board = BoardIdentity::new("AYANEO", "AB05-Mendocino");
        assert_eq!(Model::from_board(&board).unwrap(), Model::AirPlusMendo);

        let board = BoardIdentity::new("AYANEO", "AS01");
        assert_eq!(Model::from_board(&board).unwrap(), Model::Slide);
    }

    #[test]
    fn rejects_unknown_boards() {
        for (vendor, name) in [("AYANEO", "FLIP"), ("AYANEO", "air"), ("GPD", "AIR")] {
            let err = Model::from_board(&BoardIdentity::new(vendor, name)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedModel { .. }));
        }
    }

    #[test]
    fn every_model_has_a_board_name() {
        for model in Model::ALL {
            assert!(BOARD_NAMES.iter().any(|&(_, m)| m == model), "{model}");
        }
    }
}

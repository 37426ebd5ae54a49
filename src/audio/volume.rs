use std::{fmt, str::FromStr};

/// Unidades en las que un usuario puede escribir un volumen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeUnit {
    #[default]
    Percentage,
    Decibels,
    Logarithmic,
}

impl VolumeUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            VolumeUnit::Percentage => "%",
            VolumeUnit::Decibels => "dB",
            VolumeUnit::Logarithmic => "%log",
        }
    }
}

impl FromStr for VolumeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "%" | "percent" | "percentage" => Ok(VolumeUnit::Percentage),
            "db" | "decibels" => Ok(VolumeUnit::Decibels),
            "log" | "logarithmic" => Ok(VolumeUnit::Logarithmic),
            other => Err(format!("unidad de volumen desconocida: {other}")),
        }
    }
}

/// Volumen tal como lo escribió el usuario
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInput {
    pub value: f32,
    pub unit: VolumeUnit,
}

impl VolumeInput {
    pub fn new(value: f32, unit: VolumeUnit) -> Self {
        Self { value, unit }
    }

    /// Escalar de sesión (1.0 = 100 %).
    ///
    /// Los decibelios se miden contra 1 %: `40dB` es 1.0. La escala logarítmica
    /// también llega a 1.0 en 100.
    pub fn to_scalar(self) -> f32 {
        let scalar = match self.unit {
            VolumeUnit::Percentage => self.value / 100.0,
            VolumeUnit::Decibels => 10f32.powf(self.value / 20.0) / 100.0,
            VolumeUnit::Logarithmic => (4.0 * self.value.max(0.0) / 25.0).powf(1.660964) / 100.0,
        };
        scalar.max(0.0)
    }
}

impl fmt::Display for VolumeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Escalar de sesión como porcentaje redondeado, para mostrar
pub fn as_percentage(scalar: f32) -> u32 {
    (scalar.max(0.0) * 100.0).round() as u32
}

use eframe::egui::Color32;
use serde::Deserialize;
use std::{process::Command, str::FromStr};
use tracing::debug;

/// GTK theme name that switches the widget to the House of Cards palette.
const HOC_GTK_THEME: &str = "ElysiaOS-HoC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeVariant {
    #[default]
    Default,
    #[serde(alias = "hoc")]
    HouseOfCards,
}

impl FromStr for ThemeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(ThemeVariant::Default),
            "house-of-cards" | "hoc" => Ok(ThemeVariant::HouseOfCards),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

impl ThemeVariant {
    /// Asks GNOME for the current GTK theme. Any failure means the default
    /// palette.
    pub fn detect() -> Self {
        let output = Command::new("gsettings")
            .args(["get", "org.gnome.desktop.interface", "gtk-theme"])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let variant = Self::from_gtk_theme_name(&String::from_utf8_lossy(&out.stdout));
                debug!(?variant, "detected desktop theme");
                variant
            }
            Ok(out) => {
                debug!(status = %out.status, "gsettings reported failure");
                ThemeVariant::Default
            }
            Err(err) => {
                debug!(error = %err, "gsettings unavailable");
                ThemeVariant::Default
            }
        }
    }

    /// `override_variant` wins over desktop detection.
    pub fn resolve(override_variant: Option<ThemeVariant>) -> Self {
        override_variant.unwrap_or_else(Self::detect)
    }

    /// Interprets `gsettings get` output such as `'ElysiaOS-HoC'\n`.
    pub fn from_gtk_theme_name(raw: &str) -> Self {
        let name = raw.trim_end_matches(|c: char| c == '\n' || c == '\r' || c == ' ');
        let name = ['\'', '"']
            .iter()
            .find_map(|q| name.strip_prefix(*q).and_then(|n| n.strip_suffix(*q)))
            .unwrap_or(name);
        if name == HOC_GTK_THEME {
            ThemeVariant::HouseOfCards
        } else {
            ThemeVariant::Default
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            ThemeVariant::Default => Palette {
                card: [
                    Color32::from_rgba_unmultiplied(238, 178, 207, 230),
                    Color32::from_rgba_unmultiplied(255, 240, 250, 41),
                ],
                title: Color32::from_rgb(0x2a, 0x2a, 0x2a),
                artist: Color32::from_rgb(0x6a, 0x6a, 0x6a),
                time: Color32::from_rgb(0x8a, 0x8a, 0x8a),
                icon: Color32::from_rgb(0x4a, 0x4a, 0x4a),
                progress_track: Color32::from_rgba_unmultiplied(255, 255, 255, 102),
                progress: [Color32::from_rgb(0xff, 0x6b, 0xb3), Color32::from_rgb(0xff, 0xc4, 0xe1)],
                button: Color32::from_rgba_unmultiplied(255, 255, 255, 38),
                play_button: Color32::from_rgba_unmultiplied(255, 105, 180, 51),
                default_art: [Color32::from_rgb(250, 209, 237), Color32::from_rgb(255, 247, 255)],
            },
            ThemeVariant::HouseOfCards => Palette {
                card: [
                    Color32::from_rgba_unmultiplied(177, 201, 236, 153),
                    Color32::from_rgba_unmultiplied(112, 119, 189, 115),
                ],
                title: Color32::from_rgb(0x2a, 0x2a, 0x2a),
                artist: Color32::from_rgb(0x6a, 0x6a, 0x6a),
                time: Color32::from_rgb(0x8a, 0x8a, 0x8a),
                icon: Color32::from_rgb(0x4a, 0x4a, 0x4a),
                progress_track: Color32::from_rgba_unmultiplied(255, 255, 255, 102),
                progress: [Color32::from_rgb(0x70, 0x77, 0xbd), Color32::from_rgb(0xb1, 0xc9, 0xec)],
                button: Color32::from_rgba_unmultiplied(255, 255, 255, 38),
                play_button: Color32::from_rgba_unmultiplied(112, 119, 189, 51),
                default_art: [Color32::from_rgb(177, 201, 236), Color32::from_rgb(236, 240, 255)],
            },
        }
    }
}

/// Colors used by the widget. Two-element arrays are gradient stops,
/// start first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub card: [Color32; 2],
    pub title: Color32,
    pub artist: Color32,
    pub time: Color32,
    pub icon: Color32,
    pub progress_track: Color32,
    pub progress: [Color32; 2],
    pub button: Color32,
    pub play_button: Color32,
    pub default_art: [Color32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gsettings_output_is_unquoted() {
        assert_eq!(
            ThemeVariant::from_gtk_theme_name("'ElysiaOS-HoC'\n"),
            ThemeVariant::HouseOfCards
        );
        assert_eq!(
            ThemeVariant::from_gtk_theme_name("\"ElysiaOS-HoC\""),
            ThemeVariant::HouseOfCards
        );
        assert_eq!(ThemeVariant::from_gtk_theme_name("'Adwaita'\n"), ThemeVariant::Default);
        assert_eq!(ThemeVariant::from_gtk_theme_name(""), ThemeVariant::Default);
    }

    #[test]
    fn override_skips_detection() {
        assert_eq!(
            ThemeVariant::resolve(Some(ThemeVariant::HouseOfCards)),
            ThemeVariant::HouseOfCards
        );
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("HoC".parse::<ThemeVariant>(), Ok(ThemeVariant::HouseOfCards));
        assert_eq!(" default ".parse::<ThemeVariant>(), Ok(ThemeVariant::Default));
        assert!("solarized".parse::<ThemeVariant>().is_err());
    }

    #[test]
    fn variants_have_distinct_accents() {
        let default = ThemeVariant::Default.palette();
        let hoc = ThemeVariant::HouseOfCards.palette();
        assert_ne!(default.progress, hoc.progress);
        assert_ne!(default.card, hoc.card);
    }
}

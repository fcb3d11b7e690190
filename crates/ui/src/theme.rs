use chirp_client::ThemePreference;
use gpui::{App, Window};
use gpui_component::{Theme, ThemeMode};

pub fn theme_mode(preference: ThemePreference) -> ThemeMode {
    match preference {
        ThemePreference::Light => ThemeMode::Light,
        ThemePreference::Dark => ThemeMode::Dark,
    }
}

pub fn toggled(preference: ThemePreference) -> ThemePreference {
    match preference {
        ThemePreference::Light => ThemePreference::Dark,
        ThemePreference::Dark => ThemePreference::Light,
    }
}

pub fn apply_theme(preference: ThemePreference, window: Option<&mut Window>, cx: &mut App) {
    Theme::change(theme_mode(preference), window, cx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_maps_onto_theme_mode() {
        assert!(!theme_mode(ThemePreference::Light).is_dark());
        assert!(theme_mode(ThemePreference::Dark).is_dark());
    }

    #[test]
    fn toggling_twice_is_identity() {
        for preference in [ThemePreference::Light, ThemePreference::Dark] {
            assert_ne!(toggled(preference), preference);
            assert_eq!(toggled(toggled(preference)), preference);
        }
    }
}

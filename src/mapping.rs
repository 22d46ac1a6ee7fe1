// MIT License - Copyright (c) 2026 Peter Wright
// Button to action mappings

use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::constants::MODE_ANY;

/// What a mapping does when its button is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ActionType {
    /// Switch or dim a named external device.
    #[serde(rename = "homekit-action", alias = "device-action")]
    Device,
    /// Change the panel LED.
    #[serde(rename = "led-action")]
    Led,
    /// Call an HTTP endpoint.
    #[serde(rename = "url-action")]
    Url,
    /// Activate a named scene.
    #[serde(rename = "scene-action")]
    Scene,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "homekit-action",
            Self::Led => "led-action",
            Self::Url => "url-action",
            Self::Scene => "scene-action",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation applied to an external device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    On,
    Off,
    Toggle,
    /// Brightness in percent, 0-100.
    Brightness(u8),
}

impl DeviceAction {
    /// Parse an action name; `brightness` takes its level from `value`.
    pub fn parse(action: &str, value: Option<&str>) -> Option<Self> {
        match action.trim().to_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "toggle" => Some(Self::Toggle),
            "brightness" => {
                let level: u8 = value?.trim().parse().ok()?;
                (level <= 100).then_some(Self::Brightness(level))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum HttpMethod {
    #[default]
    #[serde(rename = "GET", alias = "get")]
    Get,
    #[serde(rename = "POST", alias = "post")]
    Post,
}

/// A configured rule: button number + mode selector → action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ButtonMapping {
    /// 1-based button number.
    #[serde(alias = "buttonNumber")]
    pub button_number: u8,
    /// Mode name or `"any"`.
    #[serde(default = "default_mode_color", alias = "modeColor")]
    pub mode_color: String,
    #[serde(alias = "actionType")]
    pub action_type: ActionType,
    #[serde(default)]
    pub action: String,
    /// External device name (device action) or scene name (scene action).
    #[serde(default, alias = "targetName")]
    pub target_name: Option<String>,
    /// Brightness level, LED color or scene name, depending on the action.
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<String>,
    /// Name of the virtual trigger pulsed instead of dispatching directly.
    #[serde(default, alias = "triggerName")]
    pub trigger_name: Option<String>,
}

fn default_mode_color() -> String {
    MODE_ANY.to_string()
}

/// Accept `value = 50` as well as `value = "50"`.
fn deserialize_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Loose>::deserialize(deserializer)?.map(|v| match v {
        Loose::Text(s) => s,
        Loose::Int(i) => i.to_string(),
        Loose::Float(f) => f.to_string(),
        Loose::Bool(b) => b.to_string(),
    }))
}

impl ButtonMapping {
    fn base(button_number: u8, mode_color: &str, action_type: ActionType) -> Self {
        Self {
            button_number,
            mode_color: mode_color.to_string(),
            action_type,
            action: String::new(),
            target_name: None,
            value: None,
            url: None,
            method: HttpMethod::Get,
            body: None,
            trigger_name: None,
        }
    }

    /// Switch an external device: `action` is `on`, `off`, `toggle` or `brightness`.
    pub fn device(
        button_number: u8,
        mode_color: &str,
        target: &str,
        action: &str,
        value: Option<&str>,
    ) -> Self {
        Self {
            action: action.to_string(),
            target_name: Some(target.to_string()),
            value: value.map(str::to_string),
            ..Self::base(button_number, mode_color, ActionType::Device)
        }
    }

    /// Set the LED to a `#RRGGBB` literal or a mode name.
    pub fn led(button_number: u8, mode_color: &str, value: &str) -> Self {
        Self {
            action: "set".to_string(),
            value: Some(value.to_string()),
            ..Self::base(button_number, mode_color, ActionType::Led)
        }
    }

    pub fn url(
        button_number: u8,
        mode_color: &str,
        url: &str,
        method: HttpMethod,
        body: Option<&str>,
    ) -> Self {
        Self {
            action: "request".to_string(),
            url: Some(url.to_string()),
            method,
            body: body.map(str::to_string),
            ..Self::base(button_number, mode_color, ActionType::Url)
        }
    }

    pub fn scene(button_number: u8, mode_color: &str, scene: &str) -> Self {
        Self {
            action: "activate".to_string(),
            target_name: Some(scene.to_string()),
            ..Self::base(button_number, mode_color, ActionType::Scene)
        }
    }

    pub fn with_trigger_name(mut self, name: &str) -> Self {
        self.trigger_name = Some(name.to_string());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.mode_color.eq_ignore_ascii_case(MODE_ANY)
    }

    pub fn device_action(&self) -> Option<DeviceAction> {
        DeviceAction::parse(&self.action, self.value.as_deref())
    }

    /// Scene name from `target_name`, falling back to `value`.
    pub fn scene_name(&self) -> Option<&str> {
        self.target_name.as_deref().or(self.value.as_deref())
    }
}

/// Pick the mapping for a button in the given mode.
///
/// An exact mode match wins; a `"any"` mapping is used only when no exact
/// match exists.
pub fn select_mapping<'a>(
    mappings: &'a [ButtonMapping],
    button_number: u8,
    mode: &str,
) -> Option<&'a ButtonMapping> {
    let mut wildcard = None;
    for mapping in mappings.iter().filter(|m| m.button_number == button_number) {
        if !mapping.is_wildcard() && mapping.mode_color.eq_ignore_ascii_case(mode) {
            return Some(mapping);
        }
        if wildcard.is_none() && mapping.is_wildcard() {
            wildcard = Some(mapping);
        }
    }
    wildcard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> Vec<ButtonMapping> {
        vec![
            ButtonMapping::device(1, "any", "Hall Light", "toggle", None),
            ButtonMapping::device(1, "red", "Kitchen Light", "on", None),
            ButtonMapping::led(2, "blue", "green"),
            ButtonMapping::scene(3, "any", "Movie"),
        ]
    }

    #[test]
    fn test_exact_mode_beats_wildcard() {
        let m = mappings();
        let selected = select_mapping(&m, 1, "red").unwrap();
        assert_eq!(selected.target_name.as_deref(), Some("Kitchen Light"));
    }

    #[test]
    fn test_wildcard_fallback() {
        let m = mappings();
        let selected = select_mapping(&m, 1, "green").unwrap();
        assert_eq!(selected.target_name.as_deref(), Some("Hall Light"));
        assert!(select_mapping(&m, 3, "off").is_some());
    }

    #[test]
    fn test_no_mapping() {
        let m = mappings();
        assert!(select_mapping(&m, 2, "red").is_none());
        assert!(select_mapping(&m, 9, "red").is_none());
    }

    #[test]
    fn test_mode_match_is_case_insensitive() {
        let m = mappings();
        assert!(select_mapping(&m, 2, "BLUE").is_some());
    }

    #[test]
    fn test_device_action_parse() {
        assert_eq!(DeviceAction::parse("Toggle", None), Some(DeviceAction::Toggle));
        assert_eq!(DeviceAction::parse("on", None), Some(DeviceAction::On));
        assert_eq!(DeviceAction::parse("off", None), Some(DeviceAction::Off));
        assert_eq!(
            DeviceAction::parse("brightness", Some("40")),
            Some(DeviceAction::Brightness(40))
        );
        assert_eq!(DeviceAction::parse("brightness", Some("140")), None);
        assert_eq!(DeviceAction::parse("brightness", None), None);
        assert_eq!(DeviceAction::parse("explode", None), None);
    }

    #[test]
    fn test_deserialize_camel_case_mapping() {
        let json = r#"{
            "buttonNumber": 4,
            "modeColor": "green",
            "actionType": "homekit-action",
            "action": "brightness",
            "targetName": "Desk Lamp",
            "value": 75
        }"#;
        let mapping: ButtonMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.button_number, 4);
        assert_eq!(mapping.action_type, ActionType::Device);
        assert_eq!(mapping.device_action(), Some(DeviceAction::Brightness(75)));
        assert_eq!(mapping.method, HttpMethod::Get);
    }

    #[test]
    fn test_deserialize_defaults_to_any_mode() {
        let json = r#"{
            "button_number": 5,
            "action_type": "url-action",
            "url": "http://example.invalid/hook",
            "method": "POST",
            "body": "{}"
        }"#;
        let mapping: ButtonMapping = serde_json::from_str(json).unwrap();
        assert!(mapping.is_wildcard());
        assert_eq!(mapping.action_type, ActionType::Url);
        assert_eq!(mapping.method, HttpMethod::Post);
    }

    #[test]
    fn test_scene_name_fallback() {
        let mut m = ButtonMapping::scene(3, "any", "Movie");
        assert_eq!(m.scene_name(), Some("Movie"));
        m.target_name = None;
        m.value = Some("Night".to_string());
        assert_eq!(m.scene_name(), Some("Night"));
    }
}

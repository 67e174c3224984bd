//! Fallback adapter for hosts that can only forward raw element signals
//! (clicks, attribute and text mutations) from the menu page.
//!
//! Signals for elements outside the documented ids are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::collector::{MetricsCollector, NavDirection};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub mod element_ids {
    pub const MENU_BUTTON: &str = "menuBtn";
    /// Class, not id: every category button carries it.
    pub const CATEGORY_BUTTON_CLASS: &str = "category-btn";
    pub const PREV_BUTTON: &str = "prevBtn";
    pub const NEXT_BUTTON: &str = "nextBtn";
    pub const INFO_BUTTON: &str = "infoBtn";
    pub const INFO_PANEL: &str = "infoPanel";
    pub const PRODUCT_NAME: &str = "productName";
    pub const MODEL_VIEWER: &str = "modelViewer";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementSignal {
    Click {
        #[serde(default, rename = "elementId")]
        element_id: Option<String>,
        #[serde(default, rename = "classList")]
        class_list: Vec<String>,
        #[serde(default)]
        dataset: BTreeMap<String, String>,
        #[serde(default)]
        text: Option<String>,
    },
    AttributeChanged {
        #[serde(rename = "elementId")]
        element_id: String,
        attribute: String,
        #[serde(default)]
        value: Option<String>,
    },
    TextChanged {
        #[serde(rename = "elementId")]
        element_id: String,
        text: String,
    },
    ModelLoaded {
        #[serde(default)]
        src: Option<String>,
    },
    ModelError {
        #[serde(default)]
        src: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Whether an attribute mutation on the info panel means it is now open.
/// `None` for attributes that say nothing about visibility.
pub fn info_panel_is_open(attribute: &str, value: Option<&str>) -> Option<bool> {
    let value = value.unwrap_or("").to_ascii_lowercase();
    match attribute {
        "class" => Some(
            value
                .split_whitespace()
                .any(|class| matches!(class, "open" | "show" | "visible")),
        ),
        "aria-hidden" => Some(value.trim() == "false"),
        "style" => {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            Some(!compact.contains("display:none"))
        }
        _ => None,
    }
}

/// Category name of a clicked category button: `data-category` first, then the
/// button's label.
fn category_of(dataset: &BTreeMap<String, String>, text: Option<&str>) -> Option<String> {
    dataset
        .get("category")
        .map(String::as_str)
        .or(text)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Route one signal to the matching collector notification. Returns whether
/// the signal was recognised.
pub async fn dispatch(collector: &MetricsCollector, signal: ElementSignal) -> bool {
    match signal {
        ElementSignal::Click {
            element_id,
            class_list,
            dataset,
            text,
        } => {
            if class_list
                .iter()
                .any(|class| class == element_ids::CATEGORY_BUTTON_CLASS)
            {
                return match category_of(&dataset, text.as_deref()) {
                    Some(category) => {
                        collector.on_category_click(&category).await;
                        true
                    }
                    None => {
                        log_debug!("Category button click without a category name");
                        false
                    }
                };
            }

            match element_id.as_deref() {
                Some(element_ids::MENU_BUTTON) => collector.on_menu_click().await,
                Some(element_ids::PREV_BUTTON) => collector.on_nav(NavDirection::Prev).await,
                Some(element_ids::NEXT_BUTTON) => collector.on_nav(NavDirection::Next).await,
                Some(element_ids::INFO_BUTTON) => collector.on_info_click().await,
                _ => return false,
            }
            true
        }
        ElementSignal::AttributeChanged {
            element_id,
            attribute,
            value,
        } => {
            if element_id != element_ids::INFO_PANEL {
                return false;
            }
            match info_panel_is_open(&attribute, value.as_deref()) {
                Some(open) => {
                    collector.on_info_panel_visibility_changed(open).await;
                    true
                }
                None => false,
            }
        }
        ElementSignal::TextChanged { element_id, text } => {
            if element_id != element_ids::PRODUCT_NAME {
                return false;
            }
            collector.on_product_name_changed(&text).await;
            true
        }
        ElementSignal::ModelLoaded { src } => {
            collector.on_model_loaded(src.as_deref()).await;
            true
        }
        ElementSignal::ModelError { src, message } => {
            let message = message.unwrap_or_else(|| "unknown error".to_string());
            collector.on_model_error(src.as_deref(), &message).await;
            true
        }
    }
}

//! Line-oriented host driver. Each stdin line is one notification from the
//! menu page, e.g. `item Moqueca`, `info open`, `hidden` or
//! `signal {"type":"text_changed","elementId":"productName","text":"Pastel"}`.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    bindings::{self, ElementSignal},
    collector::{FlushOutcome, MetricsCollector, NavDirection},
    models::FlushReason,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Item(String),
    Category(String),
    Menu,
    Nav(NavDirection),
    InfoOpen,
    InfoClose,
    InfoClick,
    Product(String),
    ModelLoaded(Option<String>),
    ModelError { src: Option<String>, message: String },
    Hidden,
    Visible,
    Activity(String),
    Track { name: String, payload: Value },
    CartAdd { item: String, quantity: u32 },
    CartRemove { item: String, quantity: u32 },
    Checkout { total: f64, items: Option<u32> },
    Signal(ElementSignal),
    Flush,
    Quit,
}

fn required<'a>(rest: &'a str, what: &str) -> Result<&'a str> {
    let rest = rest.trim();
    if rest.is_empty() {
        bail!("missing {what}");
    }
    Ok(rest)
}

/// `<item> [qty]`, where a trailing integer is the quantity.
fn item_and_quantity(rest: &str) -> Result<(String, u32)> {
    let rest = required(rest, "item")?;
    match rest.rsplit_once(char::is_whitespace) {
        Some((item, qty)) => match qty.parse::<u32>() {
            Ok(quantity) => Ok((item.trim().to_string(), quantity)),
            Err(_) => Ok((rest.to_string(), 1)),
        },
        None => Ok((rest.to_string(), 1)),
    }
}

impl FromStr for HostCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match verb {
            "item" => HostCommand::Item(rest.to_string()),
            "category" => HostCommand::Category(required(rest, "category")?.to_string()),
            "menu" => HostCommand::Menu,
            "nav" => match rest {
                "prev" => HostCommand::Nav(NavDirection::Prev),
                "next" => HostCommand::Nav(NavDirection::Next),
                other => bail!("unknown nav direction '{other}'"),
            },
            "info" => match rest {
                "open" => HostCommand::InfoOpen,
                "close" => HostCommand::InfoClose,
                "click" => HostCommand::InfoClick,
                other => bail!("unknown info action '{other}'"),
            },
            "product" => HostCommand::Product(required(rest, "product name")?.to_string()),
            "model" => {
                let (action, detail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let detail = detail.trim();
                match action {
                    "loaded" => HostCommand::ModelLoaded(
                        (!detail.is_empty()).then(|| detail.to_string()),
                    ),
                    "error" => {
                        let (src, message) = detail
                            .split_once(char::is_whitespace)
                            .unwrap_or((detail, ""));
                        let message = message.trim();
                        HostCommand::ModelError {
                            src: (!src.is_empty()).then(|| src.to_string()),
                            message: if message.is_empty() {
                                "unknown error".to_string()
                            } else {
                                message.to_string()
                            },
                        }
                    }
                    other => bail!("unknown model action '{other}'"),
                }
            }
            "hidden" => HostCommand::Hidden,
            "visible" => HostCommand::Visible,
            "activity" => HostCommand::Activity(required(rest, "activity kind")?.to_string()),
            "track" => {
                let rest = required(rest, "event name")?;
                let (name, raw) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let payload = match raw.trim() {
                    "" => Value::Null,
                    raw => serde_json::from_str(raw)
                        .with_context(|| format!("invalid payload for '{name}'"))?,
                };
                HostCommand::Track {
                    name: name.to_string(),
                    payload,
                }
            }
            "cart" => {
                let (action, detail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let (item, quantity) = item_and_quantity(detail)?;
                match action {
                    "add" => HostCommand::CartAdd { item, quantity },
                    "remove" => HostCommand::CartRemove { item, quantity },
                    other => bail!("unknown cart action '{other}'"),
                }
            }
            "checkout" => {
                let rest = required(rest, "total")?;
                let (total, items) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let total = total
                    .parse::<f64>()
                    .map_err(|err| anyhow!("invalid checkout total: {err}"))?;
                let items = match items.trim() {
                    "" => None,
                    count => Some(
                        count
                            .parse::<u32>()
                            .map_err(|err| anyhow!("invalid checkout item count: {err}"))?,
                    ),
                };
                HostCommand::Checkout { total, items }
            }
            "signal" => HostCommand::Signal(
                serde_json::from_str(required(rest, "signal")?).context("invalid element signal")?,
            ),
            "flush" => HostCommand::Flush,
            "quit" | "exit" => HostCommand::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command '{other}'"),
        };

        Ok(command)
    }
}

impl HostCommand {
    /// Forward to the collector. Returns `false` once the host asked to quit.
    pub async fn apply(self, collector: &MetricsCollector) -> bool {
        match self {
            HostCommand::Item(item) => collector.set_current_item(&item).await,
            HostCommand::Category(category) => collector.on_category_click(&category).await,
            HostCommand::Menu => collector.on_menu_click().await,
            HostCommand::Nav(direction) => collector.on_nav(direction).await,
            HostCommand::InfoOpen => collector.on_info_panel_visibility_changed(true).await,
            HostCommand::InfoClose => collector.on_info_panel_visibility_changed(false).await,
            HostCommand::InfoClick => collector.on_info_click().await,
            HostCommand::Product(name) => collector.on_product_name_changed(&name).await,
            HostCommand::ModelLoaded(src) => collector.on_model_loaded(src.as_deref()).await,
            HostCommand::ModelError { src, message } => {
                collector.on_model_error(src.as_deref(), &message).await
            }
            HostCommand::Hidden => collector.on_visibility_changed(false).await,
            HostCommand::Visible => collector.on_visibility_changed(true).await,
            HostCommand::Activity(kind) => collector.record_activity(&kind).await,
            HostCommand::Track { name, payload } => collector.track(&name, payload).await,
            HostCommand::CartAdd { item, quantity } => {
                collector.track_add_to_cart(&item, quantity, None).await
            }
            HostCommand::CartRemove { item, quantity } => {
                collector.track_remove_from_cart(&item, quantity).await
            }
            HostCommand::Checkout { total, items } => collector.track_checkout(total, items).await,
            HostCommand::Signal(signal) => {
                if !bindings::dispatch(collector, signal).await {
                    log_info!("Ignored element signal for an unknown element");
                }
            }
            HostCommand::Flush => {
                if let FlushOutcome::Failed = collector.flush(FlushReason::Manual).await {
                    log_warn!("Manual flush failed; events stay buffered");
                }
            }
            HostCommand::Quit => return false,
        }
        true
    }
}

/// Feed `input` line by line into the collector until EOF or `quit`.
/// Malformed lines are logged and skipped.
pub async fn run_lines<R>(collector: &MetricsCollector, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read host input")?
    {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match line.parse::<HostCommand>() {
            Ok(command) => {
                if !command.apply(collector).await {
                    break;
                }
            }
            Err(err) => log_warn!("Skipping host line '{line}': {err:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::names,
        testing::{quiet_config, Harness, RecordingTransport},
    };
    use serde_json::json;

    #[test]
    fn parses_host_lines() {
        assert_eq!(
            "item Moqueca de peixe".parse::<HostCommand>().unwrap(),
            HostCommand::Item("Moqueca de peixe".into())
        );
        assert_eq!(
            "nav prev".parse::<HostCommand>().unwrap(),
            HostCommand::Nav(NavDirection::Prev)
        );
        assert_eq!(
            "model error models/a.glb 404 not found".parse::<HostCommand>().unwrap(),
            HostCommand::ModelError {
                src: Some("models/a.glb".into()),
                message: "404 not found".into(),
            }
        );
        assert_eq!(
            "model loaded".parse::<HostCommand>().unwrap(),
            HostCommand::ModelLoaded(None)
        );
        assert_eq!(
            "cart add Pastel de queijo 2".parse::<HostCommand>().unwrap(),
            HostCommand::CartAdd {
                item: "Pastel de queijo".into(),
                quantity: 2,
            }
        );
        assert_eq!(
            "cart remove Caipirinha".parse::<HostCommand>().unwrap(),
            HostCommand::CartRemove {
                item: "Caipirinha".into(),
                quantity: 1,
            }
        );
        assert_eq!(
            r#"track promo_banner {"slot": 2}"#.parse::<HostCommand>().unwrap(),
            HostCommand::Track {
                name: "promo_banner".into(),
                payload: json!({"slot": 2}),
            }
        );
        assert_eq!(
            "checkout 42.5".parse::<HostCommand>().unwrap(),
            HostCommand::Checkout {
                total: 42.5,
                items: None,
            }
        );
        assert_eq!(
            "checkout 42.5 3".parse::<HostCommand>().unwrap(),
            HostCommand::Checkout {
                total: 42.5,
                items: Some(3),
            }
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!("nav sideways".parse::<HostCommand>().is_err());
        assert!("checkout lots".parse::<HostCommand>().is_err());
        assert!("checkout 10 several".parse::<HostCommand>().is_err());
        assert!("track".parse::<HostCommand>().is_err());
        assert!("track x {broken".parse::<HostCommand>().is_err());
        assert!("teleport".parse::<HostCommand>().is_err());
    }

    #[tokio::test]
    async fn runs_a_scripted_session_until_quit() {
        let h = Harness::bare(quiet_config(), RecordingTransport::default());
        let script = "\
# scripted visit
menu
item Pastel
bogus line
info open
quit
item ignored after quit
";

        run_lines(&h.collector, script.as_bytes()).await.unwrap();

        assert_eq!(
            h.names().await,
            [names::MENU_CLICK, names::ITEM_VIEW_START, names::INFO_OPEN]
        );
    }

    #[tokio::test]
    async fn checkout_reports_item_count_only_when_given() {
        let h = Harness::bare(quiet_config(), RecordingTransport::default());

        run_lines(&h.collector, "checkout 30 2\ncheckout 12\n".as_bytes())
            .await
            .unwrap();

        let events = h.collector.pending_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["total"], json!(30.0));
        assert_eq!(events[0].payload["items"], json!(2));
        assert_eq!(events[1].payload["total"], json!(12.0));
        assert!(!events[1].payload.contains_key("items"));
    }
}

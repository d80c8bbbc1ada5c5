use std::path::Path;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tokio::sync::mpsc;

/// Touch input for a scrollable surface
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TouchEvent {
  /// Finger down at `y` while the surface is scrolled to `scroll_top`
  Start {
    y: f64,
    #[serde(default)]
    scroll_top: f64,
  },
  /// Finger moved to `y`
  Move {
    y: f64,
    #[serde(default)]
    scroll_top: f64,
  },
  /// Finger lifted
  End,
}

/// One step of a recorded touch sequence
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedTouch {
  #[serde(flatten)]
  pub event: TouchEvent,
  /// Pause before this event is delivered
  #[serde(default)]
  pub delay_ms: u64,
}

/// A recorded touch sequence, loaded from YAML
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TouchScript(pub Vec<ScriptedTouch>);

impl TouchScript {
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read touch script {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse touch script {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }
}

/// Event handler that delivers touch events in order
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<TouchEvent>,
}

impl EventHandler {
  /// Handler fed by the returned sender
  pub fn channel() -> (mpsc::UnboundedSender<TouchEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Replay a script, honouring each step's delay
  pub fn from_script(script: TouchScript) -> Self {
    let (tx, handler) = Self::channel();

    tokio::spawn(async move {
      for step in script.0 {
        if step.delay_ms > 0 {
          tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        if tx.send(step.event).is_err() {
          break;
        }
      }
    });

    handler
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<TouchEvent> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SCRIPT: &str = r#"
- type: start
  y: 120
- type: move
  y: 220
  delay_ms: 16
- type: move
  y: 330.5
  scroll_top: 4
  delay_ms: 16
- type: end
  delay_ms: 40
"#;

  #[test]
  fn test_parse_script() {
    let script = TouchScript::parse(SCRIPT).unwrap();
    assert_eq!(script.0.len(), 4);
    assert_eq!(
      script.0[0].event,
      TouchEvent::Start {
        y: 120.0,
        scroll_top: 0.0
      }
    );
    assert_eq!(
      script.0[2].event,
      TouchEvent::Move {
        y: 330.5,
        scroll_top: 4.0
      }
    );
    assert_eq!(script.0[3].event, TouchEvent::End);
    assert_eq!(script.0[3].delay_ms, 40);
  }

  #[test]
  fn test_unknown_event_type_is_rejected() {
    assert!(TouchScript::parse("- type: pinch\n  y: 1\n").is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_replay_preserves_order() {
    let mut handler = EventHandler::from_script(TouchScript::parse(SCRIPT).unwrap());
    let mut seen = Vec::new();
    while let Some(event) = handler.next().await {
      seen.push(event);
    }
    assert_eq!(seen.len(), 4);
    assert!(matches!(seen[0], TouchEvent::Start { .. }));
    assert_eq!(seen[3], TouchEvent::End);
  }
}

//! Helper for driving an agent chat page: locating the input, sending
//! messages and telling live messages apart from history.

use crate::cdp::{ElementHandle, Page};
use crate::config::schema::ChatSettings;
use crate::error::{E2eError, Result};
use std::time::Duration;

/// Class-name markers of the containers that hold past conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMarkers {
    pub history: String,
    pub preload: String,
}

impl Default for ContainerMarkers {
    fn default() -> Self {
        let settings = ChatSettings::default();
        Self {
            history: settings.history_marker,
            preload: settings.preload_marker,
        }
    }
}

/// Where a message element sits relative to the history containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Placement {
    pub in_history: bool,
    pub in_preload: bool,
}

impl Placement {
    /// Live chat is whatever is in neither container.
    pub fn is_chat_msg(&self) -> bool {
        !self.in_history && !self.in_preload
    }
}

/// Classify from the class strings of an element and its ancestors below `body`.
pub fn classify<S: AsRef<str>>(ancestor_classes: &[S], markers: &ContainerMarkers) -> Placement {
    ancestor_classes
        .iter()
        .fold(Placement::default(), |placement, classes| {
            let classes = classes.as_ref();
            Placement {
                in_history: placement.in_history || classes.contains(markers.history.as_str()),
                in_preload: placement.in_preload || classes.contains(markers.preload.as_str()),
            }
        })
}

pub struct ChatAgent {
    page: Page,
    input_selectors: Vec<String>,
    wait_after_send: Duration,
    markers: ContainerMarkers,
}

impl ChatAgent {
    pub fn new(page: Page) -> Self {
        Self::with_settings(page, &ChatSettings::default())
    }

    pub fn with_settings(page: Page, settings: &ChatSettings) -> Self {
        Self {
            page,
            input_selectors: settings.input_selectors.clone(),
            wait_after_send: Duration::from_millis(settings.wait_after_send_ms),
            markers: ContainerMarkers {
                history: settings.history_marker.clone(),
                preload: settings.preload_marker.clone(),
            },
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn set_input_selectors(&mut self, selectors: Vec<String>) {
        self.input_selectors = selectors;
    }

    pub fn input_selectors(&self) -> &[String] {
        &self.input_selectors
    }

    pub fn markers(&self) -> &ContainerMarkers {
        &self.markers
    }

    /// First selector, in priority order, resolving to a visible element.
    pub async fn find_input(&self) -> Result<ElementHandle> {
        for selector in &self.input_selectors {
            let Some(element) = self.page.query_selector(selector).await? else {
                continue;
            };
            if element.is_visible().await? {
                tracing::info!("Found input: {}", selector);
                return Ok(element);
            }
        }

        Err(E2eError::NotFound(format!(
            "No chat input found, tried selectors: {}",
            self.input_selectors.join(", ")
        )))
    }

    /// Fill the input, let it settle, then press Enter. Single attempt.
    pub async fn send(&self, message: &str) -> Result<()> {
        tracing::info!("Sending message: {}", message);

        let input = self.find_input().await?;
        input.fill(message).await?;
        tokio::time::sleep(self.wait_after_send).await;
        input.press("Enter").await?;

        tracing::info!("Message sent");
        Ok(())
    }

    pub async fn placement(&self, element: &ElementHandle) -> Result<Placement> {
        let classes = element.ancestor_classes().await?;
        Ok(classify(&classes, &self.markers))
    }

    pub async fn is_chat_msg_element(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.placement(element).await?.is_chat_msg())
    }

    pub async fn is_history_element(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.placement(element).await?.in_history)
    }

    pub async fn is_preload_history_element(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.placement(element).await?.in_preload)
    }
}

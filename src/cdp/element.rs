use crate::cdp::page::{remote_value, Page};
use crate::error::{E2eError, Result};
use serde_json::{json, Value};

/// A remote reference to a DOM element in a page.
#[derive(Clone)]
pub struct ElementHandle {
    page: Page,
    object_id: String,
}

impl ElementHandle {
    pub(crate) fn new(page: Page, object_id: String) -> Self {
        Self { page, object_id }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Run `function_declaration` with the element bound to `this`.
    pub async fn call(&self, function_declaration: &str, args: Vec<Value>) -> Result<Value> {
        let arguments: Vec<Value> = args.into_iter().map(|v| json!({ "value": v })).collect();
        let result = self
            .page
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": self.object_id,
                    "functionDeclaration": function_declaration,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true
                }),
            )
            .await?;
        remote_value(&result)
    }

    /// Rendered with a non-empty box and not hidden by style.
    pub async fn is_visible(&self) -> Result<bool> {
        let visible = self
            .call(
                r#"function() {
                    const style = window.getComputedStyle(this);
                    if (style.visibility === 'hidden' || style.display === 'none') return false;
                    const rect = this.getBoundingClientRect();
                    return rect.width > 0 && rect.height > 0;
                }"#,
                vec![],
            )
            .await?;
        Ok(visible.as_bool().unwrap_or(false))
    }

    /// Replace the element's value the way typing would, firing `input` and `change`.
    pub async fn fill(&self, text: &str) -> Result<()> {
        let filled = self
            .call(
                r#"function(value) {
                    this.focus();
                    if (this.isContentEditable) {
                        this.textContent = value;
                    } else {
                        const proto = this instanceof HTMLTextAreaElement
                            ? HTMLTextAreaElement.prototype
                            : HTMLInputElement.prototype;
                        const setter = Object.getOwnPropertyDescriptor(proto, 'value');
                        if (!setter || !setter.set) return false;
                        setter.set.call(this, value);
                    }
                    this.dispatchEvent(new Event('input', { bubbles: true }));
                    this.dispatchEvent(new Event('change', { bubbles: true }));
                    return true;
                }"#,
                vec![json!(text)],
            )
            .await?;

        if filled.as_bool() != Some(true) {
            return Err(E2eError::Evaluation(
                "Element is not an editable input".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn focus(&self) -> Result<()> {
        self.call("function() { this.focus(); }", vec![]).await?;
        Ok(())
    }

    /// Focus the element and press a key on it.
    pub async fn press(&self, key: &str) -> Result<()> {
        self.focus().await?;
        self.page.press_key(key).await
    }

    pub async fn click(&self) -> Result<()> {
        let point = self
            .call(
                r#"function() {
                    this.scrollIntoView({ block: 'center', inline: 'center' });
                    const rect = this.getBoundingClientRect();
                    return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
                }"#,
                vec![],
            )
            .await?;
        let x = point.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = point.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);

        for event_type in ["mousePressed", "mouseReleased"] {
            self.page
                .send(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": event_type,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1
                    }),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn text_content(&self) -> Result<Option<String>> {
        let text = self.call("function() { return this.textContent; }", vec![]).await?;
        Ok(text.as_str().map(str::to_string))
    }

    /// Class strings of the element and its ancestors up to, not including,
    /// `document.body`. Innermost first.
    pub async fn ancestor_classes(&self) -> Result<Vec<String>> {
        let classes = self
            .call(
                r#"function() {
                    const out = [];
                    let node = this;
                    while (node && node !== document.body && node.nodeType === Node.ELEMENT_NODE) {
                        out.push(typeof node.className === 'string'
                            ? node.className
                            : (node.getAttribute('class') || ''));
                        node = node.parentElement;
                    }
                    return out;
                }"#,
                vec![],
            )
            .await?;

        Ok(classes
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("object_id", &self.object_id)
            .finish_non_exhaustive()
    }
}

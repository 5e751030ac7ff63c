use crate::content::message::MessageItem;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    #[serde(rename = "message")]
    Message(MessageItem),
    #[serde(rename = "function_call_output")]
    FunctionCallOutput(FunctionCallOutputItem),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "incomplete")]
    Incomplete,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct _Item {
    /// The unique ID of the item, optional for client events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The status of the item: "completed", "in_progress", "incomplete"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// Result of a completed function call, correlated to the originating
/// call by `call_id`. A call id that has been answered once is never
/// answered again.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallOutputItem {
    #[serde(flatten)]
    item: _Item,

    /// The ID of the function call being answered
    call_id: String,

    /// The JSON-encoded output of the function call
    output: String,
}

impl FunctionCallOutputItem {
    pub fn new(call_id: &str, output: String) -> Self {
        Self {
            item: _Item::default(),
            call_id: call_id.to_string(),
            output,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

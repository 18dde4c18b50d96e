use crate::types::{ChatMessageTool, ToolFunction};

/// One streamed fragment of a tool call, as providers send them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Collects tool calls across deltas.
///
/// A delta carrying an id opens a new call; one without an id appends its
/// argument fragment to the call at the same index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ChatMessageTool>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = delta.id.as_ref().filter(|id| !id.is_empty()) {
            self.calls.push(ChatMessageTool {
                id: id.clone(),
                index: delta.index,
                kind: delta.kind.clone().or_else(|| Some("function".to_string())),
                function: Some(ToolFunction {
                    name: delta.name.clone().unwrap_or_default(),
                    arguments: delta.arguments.clone().unwrap_or_default(),
                }),
                ..ChatMessageTool::default()
            });
            return;
        }

        let Some(fragment) = delta.arguments.as_deref() else {
            return;
        };
        let index = delta.index.unwrap_or(0);
        // Calls opened without an index are addressed by position.
        let target = match self.calls.iter().position(|call| call.index == Some(index)) {
            Some(pos) => self.calls.get_mut(pos),
            None => self.calls.get_mut(index).filter(|call| call.index.is_none()),
        };
        match target.and_then(|call| call.function.as_mut()) {
            Some(function) => function.arguments.push_str(fragment),
            None => tracing::warn!(index, "tool call fragment without an open call"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn calls(&self) -> &[ChatMessageTool] {
        &self.calls
    }

    pub fn take(&mut self) -> Vec<ChatMessageTool> {
        std::mem::take(&mut self.calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_without_id_extend_the_indexed_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta {
            id: Some("a".into()),
            name: Some("f".into()),
            arguments: Some("{\"x\":".into()),
            ..ToolCallDelta::default()
        });
        acc.push(&ToolCallDelta {
            index: Some(0),
            arguments: Some("1}".into()),
            ..ToolCallDelta::default()
        });

        let calls = acc.take();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        let function = calls[0].function.as_ref().unwrap();
        assert_eq!(function.name, "f");
        assert_eq!(function.arguments, "{\"x\":1}");
        assert!(acc.is_empty());
    }

    #[test]
    fn parallel_calls_are_kept_apart() {
        let mut acc = ToolCallAccumulator::new();
        for (index, id) in [(0, "a"), (1, "b")] {
            acc.push(&ToolCallDelta {
                index: Some(index),
                id: Some(id.into()),
                name: Some("calculate".into()),
                arguments: Some(String::new()),
                ..ToolCallDelta::default()
            });
        }
        acc.push(&ToolCallDelta {
            index: Some(1),
            arguments: Some("{}".into()),
            ..ToolCallDelta::default()
        });
        let calls = acc.calls();
        assert_eq!(calls[0].function.as_ref().unwrap().arguments, "");
        assert_eq!(calls[1].function.as_ref().unwrap().arguments, "{}");
    }

    #[test]
    fn orphan_fragment_is_ignored() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta {
            index: Some(3),
            arguments: Some("x".into()),
            ..ToolCallDelta::default()
        });
        assert!(acc.is_empty());
    }

    #[test]
    fn fragment_for_an_unopened_index_leaves_other_calls_alone() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta {
            index: Some(2),
            id: Some("a".into()),
            name: Some("calculate".into()),
            arguments: Some("{}".into()),
            ..ToolCallDelta::default()
        });
        for index in [0, 1] {
            acc.push(&ToolCallDelta {
                index: Some(index),
                arguments: Some("junk".into()),
                ..ToolCallDelta::default()
            });
        }
        let calls = acc.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].function.as_ref().unwrap().arguments, "{}");
    }
}

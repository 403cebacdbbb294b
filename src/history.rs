//! Undo/Redo history for collection operations.
//!
//! Every mutation of the collection is recorded as a [`Command`] holding
//! snapshots of the affected objects before and after the change. Undoing
//! or redoing a command yields the snapshots to write back; the collection
//! restores them while keeping server ids that were assigned in between.

use crate::config::HistoryConfig;
use crate::model::AnnotationObject;

// ============================================================================
// Command Types
// ============================================================================

/// A reversible collection operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Objects added by `put` (or an import)
    Create {
        /// The objects as inserted
        objects: Vec<AnnotationObject>,
    },
    /// Objects deleted by `delete`
    Remove {
        /// The objects as they were before deletion
        objects: Vec<AnnotationObject>,
    },
    /// One object edited through its state
    Modify {
        description: String,
        before: AnnotationObject,
        after: AnnotationObject,
    },
    /// Shapes and tracks merged into one track
    Merge {
        /// The merged inputs before the merge
        sources: Vec<AnnotationObject>,
        /// The resulting track
        merged: AnnotationObject,
    },
    /// A track split in two
    Split {
        before: AnnotationObject,
        /// The original track after truncation
        truncated: AnnotationObject,
        /// The new track continuing from the split frame
        created: AnnotationObject,
    },
    /// Objects assigned a new group
    Group {
        group: u64,
        before: Vec<AnnotationObject>,
        after: Vec<AnnotationObject>,
    },
    /// Objects removed or cut by a ranged clear
    Clear {
        before: Vec<AnnotationObject>,
        after: Vec<AnnotationObject>,
    },
    /// Batch command - groups multiple commands into one undo step
    Batch {
        description: String,
        commands: Vec<Command>,
    },
}

fn tombstone(object: &AnnotationObject) -> AnnotationObject {
    let mut object = object.clone();
    object.removed = true;
    for element in &mut object.elements {
        element.removed = true;
    }
    object
}

impl Command {
    /// Get a human-readable description of this command
    pub fn description(&self) -> String {
        match self {
            Command::Create { objects } if objects.len() == 1 => "Create object".to_string(),
            Command::Create { objects } => format!("Create {} objects", objects.len()),
            Command::Remove { objects } if objects.len() == 1 => "Delete object".to_string(),
            Command::Remove { objects } => format!("Delete {} objects", objects.len()),
            Command::Modify { description, .. } => description.clone(),
            Command::Merge { sources, .. } => format!("Merge {} objects", sources.len()),
            Command::Split { .. } => "Split track".to_string(),
            Command::Group { group: 0, .. } => "Reset group".to_string(),
            Command::Group { after, .. } => format!("Group {} objects", after.len()),
            Command::Clear { before, .. } => format!("Clear {} objects", before.len()),
            Command::Batch { description, .. } => description.clone(),
        }
    }

    /// Snapshots that reverse this command, in application order.
    pub fn undo_writes(&self) -> Vec<AnnotationObject> {
        match self {
            Command::Create { objects } => objects.iter().map(tombstone).collect(),
            Command::Remove { objects } => objects.clone(),
            Command::Modify { before, .. } => vec![before.clone()],
            Command::Merge { sources, merged } => {
                let mut writes = vec![tombstone(merged)];
                writes.extend(sources.iter().cloned());
                writes
            }
            Command::Split { before, created, .. } => vec![tombstone(created), before.clone()],
            Command::Group { before, .. } | Command::Clear { before, .. } => before.clone(),
            Command::Batch { commands, .. } => commands
                .iter()
                .rev()
                .flat_map(|c| c.undo_writes())
                .collect(),
        }
    }

    /// Snapshots that re-apply this command, in application order.
    pub fn redo_writes(&self) -> Vec<AnnotationObject> {
        match self {
            Command::Create { objects } => objects.clone(),
            Command::Remove { objects } => objects.iter().map(tombstone).collect(),
            Command::Modify { after, .. } => vec![after.clone()],
            Command::Merge { sources, merged } => {
                let mut writes: Vec<_> = sources.iter().map(tombstone).collect();
                writes.push(merged.clone());
                writes
            }
            Command::Split {
                truncated, created, ..
            } => vec![truncated.clone(), created.clone()],
            Command::Group { after, .. } | Command::Clear { after, .. } => after.clone(),
            Command::Batch { commands, .. } => {
                commands.iter().flat_map(|c| c.redo_writes()).collect()
            }
        }
    }
}

// ============================================================================
// Undo Stack
// ============================================================================

/// Snapshot of the history for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryInfo {
    /// Undoable commands, most recent last
    pub undo: Vec<String>,
    /// Redoable commands, most recent last
    pub redo: Vec<String>,
}

/// The undo/redo history stack.
///
/// When a new command is pushed the redo stack is cleared. Undo moves the
/// command to the redo stack and redo moves it back.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    config: HistoryConfig,
}

impl UndoStack {
    /// Create a new empty undo stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Push a command to the undo stack.
    /// This clears the redo stack (can't redo after a new action).
    pub fn push(&mut self, command: Command) {
        log::debug!("📝 Undo: pushed '{}'", command.description());
        self.undo_stack.push(command);
        self.redo_stack.clear();

        if self.undo_stack.len() > self.config.max_history {
            let excess = self.undo_stack.len() - self.config.max_history;
            self.undo_stack.drain(..excess);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Pop a command for undoing; it moves to the redo stack.
    pub fn pop_undo(&mut self) -> Option<Command> {
        let cmd = self.undo_stack.pop()?;
        log::debug!("⏪ Undo: '{}'", cmd.description());
        self.redo_stack.push(cmd.clone());
        Some(cmd)
    }

    /// Pop a command for redoing; it moves back to the undo stack.
    pub fn pop_redo(&mut self) -> Option<Command> {
        let cmd = self.redo_stack.pop()?;
        log::debug!("⏩ Redo: '{}'", cmd.description());
        self.undo_stack.push(cmd.clone());
        Some(cmd)
    }

    /// Get the description of the command that would be undone
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.last().map(|c| c.description())
    }

    /// Get the description of the command that would be redone
    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|c| c.description())
    }

    pub fn info(&self) -> HistoryInfo {
        HistoryInfo {
            undo: self.undo_stack.iter().map(Command::description).collect(),
            redo: self.redo_stack.iter().map(Command::description).collect(),
        }
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        log::debug!("🗑️ Undo history cleared");
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Geometry, ObjectKind, ShapeType};

    fn rect(client_id: u64, x: f64) -> AnnotationObject {
        AnnotationObject::new(
            client_id,
            1,
            [0, 0, 0],
            ObjectKind::Shape {
                frame: 0,
                shape_type: ShapeType::Rectangle,
                geometry: Geometry::new(vec![x, x, x + 10.0, x + 10.0]),
            },
        )
    }

    #[test]
    fn test_undo_stack_basic() {
        let mut stack = UndoStack::new();
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());

        stack.push(Command::Create {
            objects: vec![rect(1, 0.0)],
        });
        assert!(stack.can_undo());
        assert!(!stack.can_redo());

        assert!(stack.pop_undo().is_some());
        assert!(!stack.can_undo());
        assert!(stack.can_redo());

        assert!(stack.pop_redo().is_some());
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_push_clears_redo() {
        let mut stack = UndoStack::new();
        stack.push(Command::Create {
            objects: vec![rect(1, 0.0)],
        });
        stack.pop_undo();
        assert!(stack.can_redo());

        stack.push(Command::Create {
            objects: vec![rect(2, 5.0)],
        });
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_max_history() {
        let mut stack = UndoStack::with_config(HistoryConfig { max_history: 3 });
        for i in 0..5 {
            stack.push(Command::Create {
                objects: vec![rect(i, i as f64)],
            });
        }
        assert_eq!(stack.undo_count(), 3);
    }

    #[test]
    fn test_command_descriptions() {
        let create = Command::Create {
            objects: vec![rect(1, 0.0), rect(2, 0.0)],
        };
        assert_eq!(create.description(), "Create 2 objects");
        let remove = Command::Remove {
            objects: vec![rect(1, 0.0)],
        };
        assert_eq!(remove.description(), "Delete object");
        let ungroup = Command::Group {
            group: 0,
            before: Vec::new(),
            after: Vec::new(),
        };
        assert_eq!(ungroup.description(), "Reset group");

        let mut stack = UndoStack::new();
        stack.push(create);
        stack.push(remove);
        stack.pop_undo();
        let info = stack.info();
        assert_eq!(info.undo, vec!["Create 2 objects".to_string()]);
        assert_eq!(info.redo, vec!["Delete object".to_string()]);
    }

    #[test]
    fn test_writes_invert() {
        let before = rect(1, 0.0);
        let after = rect(1, 5.0);
        let modify = Command::Modify {
            description: "Move object".into(),
            before: before.clone(),
            after: after.clone(),
        };
        assert_eq!(modify.undo_writes(), vec![before.clone()]);
        assert_eq!(modify.redo_writes(), vec![after]);

        let create = Command::Create {
            objects: vec![before.clone()],
        };
        assert!(create.undo_writes().iter().all(|o| o.removed));
        assert!(create.redo_writes().iter().all(|o| !o.removed));

        let batch = Command::Batch {
            description: "Edit".into(),
            commands: vec![create, modify],
        };
        let undo = batch.undo_writes();
        assert_eq!(undo.len(), 2);
        assert!(!undo[0].removed);
        assert!(undo[1].removed);
    }
}

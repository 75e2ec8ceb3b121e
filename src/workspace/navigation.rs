use crate::entry::EntryId;

/// Label of the root breadcrumb.
pub const ROOT_LABEL: &str = "Home";

/// One breadcrumb: a folder on the path from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    /// `None` for the root.
    pub id: Option<EntryId>,
    pub name: String,
}

impl Crumb {
    fn root() -> Self {
        Self {
            id: None,
            name: ROOT_LABEL.to_string(),
        }
    }
}

/// Breadcrumb stack; the last crumb is the current folder.
///
/// The root crumb is never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationController {
    stack: Vec<Crumb>,
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationController {
    pub fn new() -> Self {
        Self {
            stack: vec![Crumb::root()],
        }
    }

    /// Open `id`. If it is already on the path, truncate to it instead.
    pub fn enter_folder(&mut self, id: EntryId, name: &str) {
        if let Some(pos) = self.position(&id) {
            self.stack.truncate(pos + 1);
            return;
        }
        self.stack.push(Crumb {
            id: Some(id),
            name: name.to_string(),
        });
    }

    /// Truncate the path to `index` inclusive. Out-of-range indices are ignored.
    pub fn click_breadcrumb(&mut self, index: usize) -> bool {
        if index >= self.stack.len() {
            return false;
        }
        self.stack.truncate(index + 1);
        true
    }

    /// Pop one level. Returns false at the root.
    pub fn go_back(&mut self) -> bool {
        if self.stack.len() <= 1 {
            return false;
        }
        self.stack.pop();
        true
    }

    /// Return to the root.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
    }

    /// Id of the current folder (`None` at the root).
    pub fn current(&self) -> Option<&EntryId> {
        self.stack.last().and_then(|c| c.id.as_ref())
    }

    pub fn current_name(&self) -> &str {
        self.stack
            .last()
            .map(|c| c.name.as_str())
            .unwrap_or(ROOT_LABEL)
    }

    pub fn crumbs(&self) -> &[Crumb] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Non-root folder ids on the path, root side first.
    pub fn path_ids(&self) -> Vec<EntryId> {
        self.stack.iter().filter_map(|c| c.id.clone()).collect()
    }

    pub fn position(&self, id: &EntryId) -> Option<usize> {
        self.stack.iter().position(|c| c.id.as_ref() == Some(id))
    }

    /// Relabel a crumb after its folder was renamed.
    pub fn rename_crumb(&mut self, id: &EntryId, name: &str) -> bool {
        match self.stack.iter_mut().find(|c| c.id.as_ref() == Some(id)) {
            Some(crumb) => {
                crumb.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop `id` and everything below it from the path, e.g. after it was deleted.
    pub fn forget(&mut self, id: &EntryId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.stack.truncate(pos.max(1));
                true
            }
            None => false,
        }
    }
}

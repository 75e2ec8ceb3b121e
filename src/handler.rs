use crate::app::Workspace;
use crate::entry::EntryId;
use crate::error::Result;
use crate::workspace::moves::MoveTarget;
use crate::workspace::projection::{SortDir, SortKey};

/// Requests a host can make of the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh,
    EnterFolder { id: EntryId },
    ClickBreadcrumb { index: usize },
    GoBack,
    Search { query: String },
    Filter { text: String },
    SetSort { key: SortKey, dir: SortDir },
    ToggleStarOnly,
    Select { id: EntryId },
    ToggleSelect { id: EntryId },
    ExtendSelection { id: EntryId, additive: bool },
    SelectAll,
    ClearSelection,
    Rename { id: EntryId, name: String },
    ToggleStar { id: EntryId },
    DeleteSelected,
    MoveSelection { target: MoveTarget },
    Drop { dragged: EntryId, onto: EntryId },
    DropOnBreadcrumb { dragged: EntryId, index: usize },
    CreateFolder { name: String },
    OpenPicker,
    PickerEnter { id: EntryId },
    PickerBreadcrumb { index: usize },
    PickerBack,
    ConfirmPicker,
    ClosePicker,
    OpenPreview { id: EntryId },
    Export { id: EntryId },
    CancelExport,
}

/// Handle a host command. Refusals are reported as error signals.
pub fn handle_command(ws: &mut Workspace, command: Command) {
    if let Err(e) = dispatch(ws, command) {
        ws.report(&e);
    }
}

fn dispatch(ws: &mut Workspace, command: Command) -> Result<()> {
    match command {
        Command::Refresh => ws.refresh(),
        Command::EnterFolder { id } => ws.enter_folder(&id)?,
        Command::ClickBreadcrumb { index } => {
            ws.click_breadcrumb(index);
        }
        Command::GoBack => {
            ws.go_back();
        }
        Command::Search { query } => ws.set_search(&query),
        Command::Filter { text } => ws.set_filter(&text),
        Command::SetSort { key, dir } => ws.set_sort(key, dir),
        Command::ToggleStarOnly => ws.toggle_star_only(),
        Command::Select { id } => ws.select(id),
        Command::ToggleSelect { id } => ws.toggle_select(id),
        Command::ExtendSelection { id, additive } => ws.extend_selection(id, additive),
        Command::SelectAll => ws.select_all(),
        Command::ClearSelection => ws.clear_selection(),
        Command::Rename { id, name } => {
            ws.rename(&id, &name)?;
        }
        Command::ToggleStar { id } => {
            ws.toggle_star(&id)?;
        }
        Command::DeleteSelected => {
            ws.delete_selected()?;
        }
        Command::MoveSelection { target } => {
            ws.move_selection(target)?;
        }
        Command::Drop { dragged, onto } => {
            ws.drop_on(&dragged, &onto)?;
        }
        Command::DropOnBreadcrumb { dragged, index } => {
            ws.drop_on_breadcrumb(&dragged, index)?;
        }
        Command::CreateFolder { name } => ws.create_folder(&name)?,
        Command::OpenPicker => ws.open_picker(),
        Command::PickerEnter { id } => {
            ws.picker_enter(&id);
        }
        Command::PickerBreadcrumb { index } => {
            ws.picker_breadcrumb(index);
        }
        Command::PickerBack => {
            ws.picker_back();
        }
        Command::ConfirmPicker => {
            ws.confirm_picker()?;
        }
        Command::ClosePicker => ws.close_picker(),
        Command::OpenPreview { id } => ws.open_preview(&id)?,
        Command::Export { id } => {
            ws.export(&id)?;
        }
        Command::CancelExport => ws.cancel_export(),
    }
    Ok(())
}

// ABOUTME: Menu context tree and numeric selection resolution.
// ABOUTME: One data-driven tree replaces per-menu loop and validation copies.

mod dispatcher;

pub use dispatcher::Dispatcher;

/// Identifies a node in the menu tree:
/// Main -> {RemoteManage -> {RemoteFile, RemoteDir}, Local, Options}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuId {
    Main,
    RemoteManage,
    RemoteFile,
    RemoteDir,
    Local,
    Options,
}

/// Operations the dispatcher forwards to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UploadFile,
    DownloadFiles,
    DeleteRemoteFile,
    ListRemoteFiles,
    RenameRemoteFile,
    ShowRemoteDir,
    ChangeRemoteDir,
    CreateRemoteDir,
    DeleteRemoteDir,
    RenameRemoteDir,
    ShowLocalDir,
    ChangeLocalDir,
    ListLocalFiles,
    RenameLocalFile,
    SetTimeout,
    ToggleDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEntry {
    Action(Action),
    Submenu(MenuId),
    Back,
    Quit,
}

/// One node of the menu tree: a title plus ordered options. The last
/// option is the `0` sentinel (Back in submenus, Quit at the root).
pub struct MenuContext {
    pub title: &'static str,
    pub options: &'static [(&'static str, MenuEntry)],
}

static MAIN: MenuContext = MenuContext {
    title: "SFTP Menu",
    options: &[
        ("Remote Management", MenuEntry::Submenu(MenuId::RemoteManage)),
        ("Local Files", MenuEntry::Submenu(MenuId::Local)),
        ("Options", MenuEntry::Submenu(MenuId::Options)),
        ("Disconnect from Server", MenuEntry::Quit),
    ],
};

static REMOTE_MANAGE: MenuContext = MenuContext {
    title: "Remote Menu",
    options: &[
        ("File Management", MenuEntry::Submenu(MenuId::RemoteFile)),
        ("Directory Management", MenuEntry::Submenu(MenuId::RemoteDir)),
        ("SFTP Menu", MenuEntry::Back),
    ],
};

static REMOTE_FILE: MenuContext = MenuContext {
    title: "Remote File Menu",
    options: &[
        ("Upload File to Remote Directory", MenuEntry::Action(Action::UploadFile)),
        ("Download Files from Remote Directory", MenuEntry::Action(Action::DownloadFiles)),
        ("Delete File from Remote Directory", MenuEntry::Action(Action::DeleteRemoteFile)),
        ("List Files in Current Directory", MenuEntry::Action(Action::ListRemoteFiles)),
        ("Rename File", MenuEntry::Action(Action::RenameRemoteFile)),
        ("Remote Menu", MenuEntry::Back),
    ],
};

static REMOTE_DIR: MenuContext = MenuContext {
    title: "Remote Directory Menu",
    options: &[
        ("List Current Directory", MenuEntry::Action(Action::ShowRemoteDir)),
        ("List Files in Current Directory", MenuEntry::Action(Action::ListRemoteFiles)),
        ("Change Directory", MenuEntry::Action(Action::ChangeRemoteDir)),
        ("Create Directory", MenuEntry::Action(Action::CreateRemoteDir)),
        ("Delete Directory", MenuEntry::Action(Action::DeleteRemoteDir)),
        ("Rename Directory", MenuEntry::Action(Action::RenameRemoteDir)),
        ("Remote Menu", MenuEntry::Back),
    ],
};

static LOCAL: MenuContext = MenuContext {
    title: "Local File Menu",
    options: &[
        ("List Current Directory", MenuEntry::Action(Action::ShowLocalDir)),
        ("Change Current Directory", MenuEntry::Action(Action::ChangeLocalDir)),
        ("List Local Files", MenuEntry::Action(Action::ListLocalFiles)),
        ("Rename Local File", MenuEntry::Action(Action::RenameLocalFile)),
        ("SFTP Menu", MenuEntry::Back),
    ],
};

static OPTIONS: MenuContext = MenuContext {
    title: "Options Menu",
    options: &[
        ("Set Timeout Length", MenuEntry::Action(Action::SetTimeout)),
        ("Show Full File Details", MenuEntry::Action(Action::ToggleDetail)),
        ("SFTP Menu", MenuEntry::Back),
    ],
};

impl MenuId {
    pub fn context(self) -> &'static MenuContext {
        match self {
            MenuId::Main => &MAIN,
            MenuId::RemoteManage => &REMOTE_MANAGE,
            MenuId::RemoteFile => &REMOTE_FILE,
            MenuId::RemoteDir => &REMOTE_DIR,
            MenuId::Local => &LOCAL,
            MenuId::Options => &OPTIONS,
        }
    }
}

impl MenuContext {
    /// Resolve one line of input. Non-numeric input counts as selection -1
    /// and is always invalid; `0` selects the sentinel (displayed last);
    /// `1..=n-1` select the remaining options in display order. Invalid
    /// selections resolve to `None` and mutate nothing.
    pub fn resolve(&self, input: &str) -> Option<MenuEntry> {
        let selection: i64 = input.trim().parse().unwrap_or(-1);
        let last = self.options.len() as i64 - 1;
        match selection {
            0 => self.options.last().map(|(_, entry)| *entry),
            n if n >= 1 && n <= last => Some(self.options[(n - 1) as usize].1),
            _ => None,
        }
    }

    /// Numbered option listing with the `0` sentinel last.
    pub fn render(&self) -> String {
        let mut out = format!("\n{}:\n", self.title);
        for (i, (label, _)) in self.options.iter().enumerate() {
            if i + 1 == self.options.len() {
                out.push_str(&format!("\n\t0. {label}\n"));
            } else {
                out.push_str(&format!("\t{}. {label}\n", i + 1));
            }
        }
        out
    }
}

// ABOUTME: Interactive dispatch loop over the menu tree.
// ABOUTME: Checks session liveness before every action and unwinds on disconnect.

use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Action, MenuContext, MenuEntry, MenuId};
use crate::error::{Error, Result};
use crate::input::Prompt;
use crate::session::{
    Connect, Credential, DEFAULT_PORT, LocalEntry, OpError, RemoteEntry, ServerEndpoint,
    SessionManager, Transport,
};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

/// The pre-connect root: connecting succeeds into the SFTP menu tree;
/// quitting here ends the process.
static ROOT: MenuContext = MenuContext {
    title: "Main Menu",
    options: &[
        ("Connect to Server", MenuEntry::Submenu(MenuId::Main)),
        ("Quit", MenuEntry::Quit),
    ],
};

enum Flow {
    Continue,
    Unwind,
}

/// Drives menu contexts against one session. Owns the session manager for
/// the life of the program and the rendering preferences.
pub struct Dispatcher<T: Transport, P: Prompt> {
    session: SessionManager<T>,
    prompt: P,
    long_listing: bool,
}

impl<T: Transport, P: Prompt> Dispatcher<T, P> {
    pub fn new(session: SessionManager<T>, prompt: P) -> Self {
        Self {
            session,
            prompt,
            long_listing: false,
        }
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    /// Top-level loop. Returns after an explicit quit at the root menu; an
    /// exhausted input source counts as a forced quit. The session is
    /// released on every exit path.
    pub async fn run(&mut self) -> Result<()> {
        let outcome = self.run_root().await;
        self.session.quit().await;
        match outcome {
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(()),
            other => other,
        }
    }

    async fn run_root(&mut self) -> Result<()> {
        print!("{CLEAR_SCREEN}");
        loop {
            print!("{}", ROOT.render());
            let line = self.prompt.read_line("")?;
            match ROOT.resolve(&line) {
                Some(MenuEntry::Submenu(MenuId::Main)) => {
                    if self.connect_flow().await? {
                        print!("{CLEAR_SCREEN}");
                        self.menu_loop().await?;
                    }
                }
                Some(MenuEntry::Quit) => return Ok(()),
                _ => println!("\nInvalid selection!"),
            }
        }
    }

    /// Gather endpoint and credential interactively and drive the connect
    /// state machine, including the host-key decision. Returns true when a
    /// session was established.
    async fn connect_flow(&mut self) -> Result<bool> {
        let host = self.prompt.read_line("Host: ")?;
        let port = self.prompt_port()?;
        let trust_path = self
            .prompt
            .read_line("Trust store file (default ~/.ssh/sftp_hosts): ")?;
        let username = self.prompt.read_line("User name: ")?;
        let password = self.prompt.read_password("Password: ")?;

        let endpoint = ServerEndpoint::new(host, port);
        let credential = Credential::new(username, password);

        match self.session.connect(endpoint, credential, &trust_path).await {
            Ok(Connect::Established) => Ok(true),
            Ok(Connect::KeyDecision(key)) => {
                println!(
                    "\nThe authenticity of host '{}' can't be established.",
                    key.host
                );
                println!("{} key: {}", key.key_type, key.key_material);
                if self.prompt.confirm("Trust this host and continue connecting?")? {
                    match self.session.accept_host_key().await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            println!("\nConnection failed: {e}");
                            Ok(false)
                        }
                    }
                } else {
                    self.session.decline_host_key();
                    println!("\nHost key rejected.");
                    Ok(false)
                }
            }
            Err(e) => {
                println!("\nConnection failed: {e}");
                Ok(false)
            }
        }
    }

    fn prompt_port(&mut self) -> Result<u16> {
        loop {
            let line = self.prompt.read_line("Port number (default 22): ")?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return Ok(DEFAULT_PORT);
            }
            match trimmed.parse::<u16>() {
                Ok(port) if port > 0 => return Ok(port),
                _ => println!("Positive integers up to 65535 only!"),
            }
        }
    }

    /// The connected loop over the menu tree. Ends on quit, or as a forced
    /// quit when the session turns out to be dead.
    async fn menu_loop(&mut self) -> Result<()> {
        let mut stack = vec![MenuId::Main];
        loop {
            if !self.session.check_connected().await {
                println!("\nServer disconnected.");
                return Ok(());
            }
            let ctx = stack.last().copied().unwrap_or(MenuId::Main).context();
            print!("{}", ctx.render());
            let line = self.prompt.read_line("")?;
            let Some(entry) = ctx.resolve(&line) else {
                println!("\nInvalid selection!");
                continue;
            };
            match entry {
                MenuEntry::Submenu(id) => stack.push(id),
                MenuEntry::Back => {
                    stack.pop();
                    if stack.is_empty() {
                        stack.push(MenuId::Main);
                    }
                }
                MenuEntry::Quit => {
                    self.session.quit().await;
                    println!("\nServer disconnected.");
                    return Ok(());
                }
                MenuEntry::Action(action) => {
                    // No remote action is ever attempted while disconnected:
                    // a dead session tears the whole menu stack down.
                    if !self.session.check_connected().await {
                        println!("\nServer disconnected.");
                        return Ok(());
                    }
                    if let Flow::Unwind = self.perform(action).await? {
                        println!("\nServer disconnected.");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Result<Flow> {
        let outcome = match action {
            Action::UploadFile => self.upload_file().await,
            Action::DownloadFiles => self.download_files().await,
            Action::DeleteRemoteFile => self.delete_remote_file().await,
            Action::ListRemoteFiles => self.print_remote_listing().await,
            Action::RenameRemoteFile => self.rename_remote("File").await,
            Action::ShowRemoteDir => self.show_remote_dir(),
            Action::ChangeRemoteDir => self.change_remote_dir().await,
            Action::CreateRemoteDir => self.create_remote_dir().await,
            Action::DeleteRemoteDir => self.delete_remote_dir().await,
            Action::RenameRemoteDir => self.rename_remote("Directory").await,
            Action::ShowLocalDir => self.show_local_dir(),
            Action::ChangeLocalDir => self.change_local_dir(),
            Action::ListLocalFiles => self.print_local_listing(),
            Action::RenameLocalFile => self.rename_local_file(),
            Action::SetTimeout => self.set_timeout_flow(),
            Action::ToggleDetail => self.toggle_detail(),
        };
        match outcome {
            Ok(()) => Ok(Flow::Continue),
            Err(OpError::NotConnected) => Ok(Flow::Unwind),
            Err(e) => {
                println!("\nOperation failed: {e}");
                Ok(Flow::Continue)
            }
        }
    }

    async fn upload_file(&mut self) -> std::result::Result<(), OpError> {
        let name = self.prompt.read_line("File to upload: ")?;
        let bytes = self.session.upload(name.trim()).await?;
        println!("Uploaded {} ({bytes} bytes)", name.trim());
        Ok(())
    }

    async fn download_files(&mut self) -> std::result::Result<(), OpError> {
        self.print_remote_listing().await?;
        let line = self.prompt.read_line("Files (space separated): ")?;
        for name in line.split_whitespace() {
            let dest = self.session.local_path(name)?;
            if dest.exists() {
                let overwrite = self
                    .prompt
                    .confirm(&format!("Overwrite local file {name}?"))?;
                if !overwrite {
                    continue;
                }
            }
            match self.session.download(name, name).await {
                Ok(bytes) => println!("Downloaded {name} ({bytes} bytes)"),
                Err(OpError::NotConnected) => return Err(OpError::NotConnected),
                Err(e) => println!("Failed to download {name}: {e}"),
            }
        }
        Ok(())
    }

    async fn delete_remote_file(&mut self) -> std::result::Result<(), OpError> {
        let name = self.prompt.read_line("File to delete: ")?;
        self.session.remove_remote_file(name.trim()).await
    }

    async fn rename_remote(&mut self, kind: &str) -> std::result::Result<(), OpError> {
        let old = self.prompt.read_line(&format!("{kind} to rename: "))?;
        let new = self.prompt.read_line(&format!("New {} name: ", kind.to_lowercase()))?;
        self.session.rename_remote(old.trim(), new.trim()).await
    }

    fn show_remote_dir(&mut self) -> std::result::Result<(), OpError> {
        println!("{}", self.session.pwd()?);
        Ok(())
    }

    async fn change_remote_dir(&mut self) -> std::result::Result<(), OpError> {
        let dir = self.prompt.read_line("Remote directory: ")?;
        let resolved = self.session.cd(dir.trim()).await?;
        println!("{resolved}");
        Ok(())
    }

    async fn create_remote_dir(&mut self) -> std::result::Result<(), OpError> {
        let name = self.prompt.read_line("Directory to create: ")?;
        self.session.mkdir(name.trim()).await
    }

    async fn delete_remote_dir(&mut self) -> std::result::Result<(), OpError> {
        self.print_remote_listing().await?;
        let name = self.prompt.read_line("Directory to delete: ")?;
        self.session.remove_remote_dir(name.trim()).await
    }

    fn show_local_dir(&mut self) -> std::result::Result<(), OpError> {
        println!("{}", self.session.local_cwd()?.display());
        Ok(())
    }

    fn change_local_dir(&mut self) -> std::result::Result<(), OpError> {
        let dir = self.prompt.read_line("Directory: ")?;
        let resolved = self.session.change_local_dir(dir.trim())?;
        println!("{}", resolved.display());
        Ok(())
    }

    fn rename_local_file(&mut self) -> std::result::Result<(), OpError> {
        let old = self.prompt.read_line("File to rename: ")?;
        let new = self.prompt.read_line("New file name: ")?;
        self.session.rename_local(old.trim(), new.trim())
    }

    fn set_timeout_flow(&mut self) -> std::result::Result<(), OpError> {
        loop {
            let line = self.prompt.read_line("Timeout in milliseconds: ")?;
            match line.trim().parse::<u64>() {
                Ok(millis) => {
                    self.session.set_timeout(Duration::from_millis(millis))?;
                    println!("Timeout set to {millis} ms");
                    return Ok(());
                }
                Err(_) => println!("Positive integers only!"),
            }
        }
    }

    fn toggle_detail(&mut self) -> std::result::Result<(), OpError> {
        self.long_listing = self.prompt.confirm("Show full file information?")?;
        Ok(())
    }

    async fn print_remote_listing(&mut self) -> std::result::Result<(), OpError> {
        let entries = self.session.list_remote().await?;
        println!();
        for entry in &entries {
            if self.long_listing {
                println!("{}", format_remote_entry(entry));
            } else {
                println!("{}", entry.name);
            }
        }
        Ok(())
    }

    fn print_local_listing(&mut self) -> std::result::Result<(), OpError> {
        let entries = self.session.list_local()?;
        println!();
        for entry in &entries {
            if self.long_listing {
                println!("{}", format_local_entry(entry));
            } else {
                println!("{}", entry.name);
            }
        }
        Ok(())
    }
}

fn format_mode(is_dir: bool, permissions: Option<u32>) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    let mode = permissions.unwrap_or(0);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn format_timestamp(modified: Option<DateTime<Utc>>) -> String {
    modified
        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_remote_entry(entry: &RemoteEntry) -> String {
    format!(
        "{} {:>10} {:>16} {}",
        format_mode(entry.is_dir, entry.permissions),
        entry.size,
        format_timestamp(entry.modified),
        entry.name
    )
}

fn format_local_entry(entry: &LocalEntry) -> String {
    let modified = entry.modified.map(DateTime::<Utc>::from);
    format!(
        "{} {:>10} {:>16} {}",
        if entry.is_dir { "d" } else { "-" },
        entry.size,
        format_timestamp(modified),
        entry.name
    )
}

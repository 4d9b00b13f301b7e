use std::path::PathBuf;

use tracing::info;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, settings_file_exists, shellexpand_path};

pub fn run(data_dir: Option<String>, user: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(user) = user {
        settings.user_name = user.trim().to_string();
    }

    let dir = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&dir)?;
    let db_path = settings.db_path();
    let existed = db_path.exists();

    let conn = get_connection(&db_path)?;
    init_db(&conn)?;
    save_settings(&settings)?;
    info!(db = %db_path.display(), fresh = !existed, "initialized");

    if existed {
        println!("Using existing database at {}", db_path.display());
    } else {
        println!("Created database at {}", db_path.display());
    }
    if !settings_file_exists() {
        println!("Warning: settings could not be written.");
    }
    Ok(())
}

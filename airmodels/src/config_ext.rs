//! Extension de airconfig pour la base de données

use std::path::PathBuf;

use crate::Store;

/// Trait d'extension pour airconfig::Config
pub trait StoreConfigExt {
    /// Chemin de la base SQLite (`database.path`, relatif au répertoire de
    /// configuration)
    fn database_path(&self) -> PathBuf;

    /// Répertoire contenant les répertoires de travail des stations
    fn stations_dir(&self) -> crate::Result<PathBuf>;

    /// Ouvre la base configurée
    fn open_store(&self) -> crate::Result<Store> {
        Store::open(&self.database_path())
    }
}

impl StoreConfigExt for airconfig::Config {
    fn database_path(&self) -> PathBuf {
        let path = self.get_string_or(&["database", "path"], "airstation.db");
        self.resolve_path(&path)
    }

    fn stations_dir(&self) -> crate::Result<PathBuf> {
        let dir = self.get_managed_dir(&["stations", "directory"], "stations")?;
        Ok(PathBuf::from(dir))
    }
}

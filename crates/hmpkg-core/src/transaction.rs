use std::path::{Path, PathBuf};

use crate::activate::{Activate, ApplyFailure};
use crate::backup::{BackupError, ConfigBackup};
use crate::packages::{add_packages, delete_packages, PackageError};

/// Terminal state of one backup → mutate → apply → restore sequence.
#[derive(Debug)]
pub enum Outcome {
    /// The backup could not be taken; the file was left alone.
    Aborted(BackupError),
    Applied(Vec<String>),
    /// Apply failed and the backup was put back.
    RolledBack(ApplyFailure),
    /// Apply failed and so did the restore. The file may be half edited.
    Critical {
        apply: ApplyFailure,
        restore: BackupError,
    },
}

/// Serializes edits to one configuration file against an activator.
pub struct PackageTransaction<'a, A: ?Sized> {
    path: PathBuf,
    activator: &'a A,
}

impl<'a, A: Activate + ?Sized> PackageTransaction<'a, A> {
    pub fn new(path: impl Into<PathBuf>, activator: &'a A) -> Self {
        PackageTransaction {
            path: path.into(),
            activator,
        }
    }

    pub fn add_packages(
        &self,
        package_type: &str,
        names: &[String],
        allow_insecure: bool,
        overwrite: bool,
    ) -> Outcome {
        self.run(allow_insecure, |path| {
            add_packages(path, package_type, names, overwrite)
        })
    }

    /// Deletion cannot introduce insecure packages, so apply always allows them.
    pub fn delete_packages(&self, package_type: Option<&str>, names: &[String]) -> Outcome {
        self.run(true, |path| delete_packages(path, names, package_type))
    }

    fn run(
        &self,
        allow_insecure: bool,
        mutate: impl FnOnce(&Path) -> Result<Vec<String>, PackageError>,
    ) -> Outcome {
        let backup = ConfigBackup::new(&self.path);
        if let Err(err) = backup.backup() {
            tracing::warn!(path = %self.path.display(), error = %err, "backup failed, aborting");
            return Outcome::Aborted(err);
        }

        let packages = mutate(&self.path).unwrap_or_else(|err| {
            tracing::warn!(path = %self.path.display(), error = %err, "package edit failed");
            Vec::new()
        });

        let apply = match self.activator.activate(allow_insecure) {
            Ok(_) => {
                tracing::info!(path = %self.path.display(), "configuration applied");
                return Outcome::Applied(packages);
            }
            Err(apply) => apply,
        };

        tracing::warn!(
            path = %self.path.display(),
            errors = ?apply.simple_error,
            "apply failed, restoring backup"
        );
        match backup.restore() {
            Ok(status) => {
                tracing::info!(%status, "backup restored after failed apply");
                Outcome::RolledBack(apply)
            }
            Err(restore) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %restore,
                    "failed to restore backup after failed apply"
                );
                Outcome::Critical { apply, restore }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::activate::ApplyFailure;
    use crate::backup::{backup_path_for, BackupError};
    use crate::process::CommandOutput;
    use crate::transaction::{Outcome, PackageTransaction};
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    const HOME_NIX: &str = "{\n  home.packages = [\n    pkgs.git\n  ];\n}\n";

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("home.nix");
        std::fs::write(&path, HOME_NIX).expect("fixture write failed");
        path
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).expect("read failed")
    }

    fn succeed(_allow_insecure: bool) -> Result<CommandOutput, ApplyFailure> {
        Ok(CommandOutput {
            success: true,
            ..CommandOutput::default()
        })
    }

    fn fail(_allow_insecure: bool) -> Result<CommandOutput, ApplyFailure> {
        Err(ApplyFailure {
            output: Vec::new(),
            simple_error: owned(&["'pkgs.htopp' missing"]),
            full_error: owned(&["error: attribute 'pkgs.htopp' missing"]),
        })
    }

    #[test]
    fn successful_add_is_applied() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = fixture(&dir);
        let seen = RefCell::new(Vec::new());
        let activator = |allow_insecure: bool| {
            seen.borrow_mut().push(allow_insecure);
            succeed(allow_insecure)
        };

        let outcome = PackageTransaction::new(&path, &activator).add_packages(
            "home",
            &owned(&["nixpkgs.htop"]),
            false,
            false,
        );
        match outcome {
            Outcome::Applied(packages) => {
                assert_eq!(packages, owned(&["pkgs.htop", "pkgs.git"]))
            }
            other => panic!("expected applied, got {:?}", other),
        }
        assert_eq!(*seen.borrow(), vec![false]);
        assert!(read(&path).contains("    pkgs.htop\n    pkgs.git\n"));
        assert_eq!(read(&backup_path_for(&path)), HOME_NIX);
    }

    #[test]
    fn failed_apply_rolls_back_add() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = fixture(&dir);

        let outcome = PackageTransaction::new(&path, &fail).add_packages(
            "home",
            &owned(&["pkgs.htopp"]),
            true,
            false,
        );
        match outcome {
            Outcome::RolledBack(failure) => {
                assert_eq!(failure.simple_error, owned(&["'pkgs.htopp' missing"]))
            }
            other => panic!("expected rolled back, got {:?}", other),
        }
        assert_eq!(read(&path), HOME_NIX);
    }

    #[test]
    fn delete_always_allows_insecure() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = fixture(&dir);
        let seen = RefCell::new(Vec::new());
        let activator = |allow_insecure: bool| {
            seen.borrow_mut().push(allow_insecure);
            succeed(allow_insecure)
        };

        let outcome = PackageTransaction::new(&path, &activator)
            .delete_packages(None, &owned(&["pkgs.git", "pkgs.absent"]));
        match outcome {
            Outcome::Applied(deleted) => assert_eq!(deleted, owned(&["pkgs.git"])),
            other => panic!("expected applied, got {:?}", other),
        }
        assert_eq!(*seen.borrow(), vec![true]);
        assert_eq!(
            read(&path),
            "{\n  home.packages = [\n\n    #empty\n  ];\n}\n"
        );
    }

    #[test]
    fn backup_failure_aborts_before_mutation() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = fixture(&dir);
        std::fs::create_dir(backup_path_for(&path)).expect("mkdir failed");
        let called = RefCell::new(false);
        let activator = |allow_insecure: bool| {
            *called.borrow_mut() = true;
            succeed(allow_insecure)
        };

        let outcome = PackageTransaction::new(&path, &activator).add_packages(
            "home",
            &owned(&["pkgs.htop"]),
            false,
            false,
        );
        assert!(matches!(
            outcome,
            Outcome::Aborted(BackupError::BackupNotRegular(_))
        ));
        assert!(!*called.borrow());
        assert_eq!(read(&path), HOME_NIX);
    }

    #[test]
    fn failed_restore_is_critical() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = fixture(&dir);
        let backup_path = backup_path_for(&path);
        let activator = |allow_insecure: bool| {
            // the backup disappears while the switch is running
            std::fs::remove_file(&backup_path).expect("remove failed");
            fail(allow_insecure)
        };

        let outcome = PackageTransaction::new(&path, &activator).add_packages(
            "home",
            &owned(&["pkgs.htop"]),
            false,
            false,
        );
        match outcome {
            Outcome::Critical { apply, restore } => {
                assert_eq!(apply.full_error.len(), 1);
                assert!(matches!(restore, BackupError::MissingBackup(_)));
            }
            other => panic!("expected critical, got {:?}", other),
        }
        assert!(read(&path).contains("pkgs.htop"));
    }

    #[test]
    fn structural_error_still_applies_unchanged_file() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("home.nix");
        let content = "home.packages = [\n];\nhome.packages = [\n];\n";
        std::fs::write(&path, content).expect("write failed");

        let outcome = PackageTransaction::new(&path, &succeed).add_packages(
            "home",
            &owned(&["pkgs.htop"]),
            false,
            false,
        );
        match outcome {
            Outcome::Applied(packages) => assert!(packages.is_empty()),
            other => panic!("expected applied, got {:?}", other),
        }
        assert_eq!(read(&path), content);
    }

    #[cfg(unix)]
    #[test]
    fn rollback_keeps_symlinked_config() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let real = dir.path().join("dotfiles.nix");
        let path = dir.path().join("home.nix");
        std::fs::write(&real, HOME_NIX).expect("write failed");
        std::os::unix::fs::symlink(&real, &path).expect("symlink failed");

        let outcome = PackageTransaction::new(&path, &fail).add_packages(
            "home",
            &owned(&["pkgs.bad"]),
            false,
            false,
        );
        assert!(matches!(outcome, Outcome::RolledBack(_)));
        assert!(std::fs::symlink_metadata(&path)
            .expect("link missing")
            .file_type()
            .is_symlink());
        assert_eq!(read(&real), HOME_NIX);
    }
}

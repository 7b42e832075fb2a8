//! Name-keyed engine registry: command dispatch, reload reconciliation,
//! shutdown fan-out.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};

use crate::{
    config::{self, Config},
    engine::Engine,
    logging::Logger,
};

pub struct Registry {
    config_path: PathBuf,
    logger: Logger,
    engines: BTreeMap<String, Arc<Engine>>,
}

impl Registry {
    pub fn new(config_path: PathBuf, logger: Logger) -> Self {
        Self {
            config_path,
            logger,
            engines: BTreeMap::new(),
        }
    }

    /// Construct one engine per declared program and start those marked
    /// auto_start. A failed start aborts initialization after stopping the
    /// engines that already came up.
    pub async fn initialize(&mut self, config: &Config) -> Result<()> {
        for (name, program) in &config.programs {
            self.engines.insert(
                name.clone(),
                Engine::new(name.clone(), program.clone(), self.logger.clone()),
            );
        }

        let mut started: Vec<Arc<Engine>> = Vec::new();
        for engine in self.engines.values() {
            if !engine.auto_start() {
                continue;
            }
            if let Err(error) = engine.start().await {
                self.logger
                    .error(&format!("{}: failed to start: {error}", engine.name()));
                for prior in &started {
                    prior.stop().await;
                }
                return Err(anyhow!(error))
                    .with_context(|| format!("initializing program '{}'", engine.name()));
            }
            started.push(Arc::clone(engine));
        }
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        let engine = self.engine(name)?;
        engine
            .start()
            .await
            .with_context(|| format!("starting program '{name}'"))
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.engine(name)?.stop().await;
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        let engine = self.engine(name)?;
        engine.stop().await;
        engine
            .start()
            .await
            .with_context(|| format!("restarting program '{name}'"))
    }

    pub fn status(&self) -> Vec<String> {
        self.engines
            .iter()
            .map(|(name, engine)| format!("{name}: {}", engine.status()))
            .collect()
    }

    /// Re-read the config file and reconcile: update programs present on
    /// both sides, add new ones, remove vanished ones. A config error
    /// aborts before any engine is touched; a failure on one program is
    /// logged and skips only that program.
    pub async fn reload(&mut self) -> Result<()> {
        let config = config::load_from_path(&self.config_path).with_context(|| {
            format!(
                "reloading configuration from {:?}",
                self.config_path.as_os_str()
            )
        })?;

        self.logger.info("reloading configuration");

        for (name, engine) in &self.engines {
            let Some(next) = config.programs.get(name) else {
                continue;
            };
            let diff = engine.diff_against(next);
            if diff.is_empty() {
                continue;
            }
            // A bare replica-count change scales in place; anything else
            // goes through the engine's stop-and-restart reload.
            let outcome = if diff.only_instances() {
                engine.scale(next.instances).await
            } else {
                engine.reload(next.clone()).await
            };
            if let Err(error) = outcome {
                self.logger
                    .error(&format!("{name}: reload failed: {error}"));
                tracing::error!(program = %name, %error, "reload failed, leaving program as-is");
            }
        }

        for (name, program) in &config.programs {
            if self.engines.contains_key(name) {
                continue;
            }
            self.logger.info(&format!("{name}: new program"));
            let engine = Engine::new(name.clone(), program.clone(), self.logger.clone());
            if program.auto_start {
                if let Err(error) = engine.start().await {
                    self.logger
                        .error(&format!("{name}: failed to start: {error}"));
                }
            }
            self.engines.insert(name.clone(), engine);
        }

        let removed: Vec<String> = self
            .engines
            .keys()
            .filter(|name| !config.programs.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            if let Some(engine) = self.engines.remove(&name) {
                engine.stop().await;
                self.logger
                    .info(&format!("{name}: removed from configuration"));
            }
        }

        Ok(())
    }

    /// Sequential shutdown of every engine.
    pub async fn stop_all(&self) {
        for (name, engine) in &self.engines {
            tracing::debug!(program = %name, "stopping");
            engine.stop().await;
        }
    }

    fn engine(&self, name: &str) -> Result<&Arc<Engine>> {
        self.engines
            .get(name)
            .ok_or_else(|| anyhow!("unknown program '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::Path};
    use tempfile::TempDir;

    fn write_config(dir: &Path, programs: &[(&str, &str, u32, bool)]) -> PathBuf {
        let mut contents = String::from("logging_enabled = false\n");
        for (name, command, instances, auto_start) in programs {
            contents.push_str(&format!(
                r#"
[programs.{name}]
command = "{command}"
instances = {instances}
auto_start = {auto_start}
auto_restart = "never"
start_time = 0
stop_time = 5
restart_attempts = 0
stop_signal = "SIGTERM"
expected_exit_codes = [0]
working_directory = "{dir}"
umask = -1
stdout_log = "{dir}/{name}.out"
stderr_log = "{dir}/{name}.err"
environment_variables = []
"#,
                dir = dir.display(),
            ));
        }
        let path = dir.join("warden.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    async fn registry_from(dir: &TempDir, programs: &[(&str, &str, u32, bool)]) -> Registry {
        let path = write_config(dir.path(), programs);
        let config = config::load_from_path(&path).expect("config loads");
        let mut registry = Registry::new(path, Logger::disabled());
        registry.initialize(&config).await.expect("initialize");
        registry
    }

    #[tokio::test]
    async fn initialize_starts_only_auto_start_programs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_from(
            &dir,
            &[
                ("auto", "sleep 30", 2, true),
                ("manual", "sleep 30", 1, false),
            ],
        )
        .await;

        let status = registry.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0], "auto: 2 out of 2 instances running");
        assert_eq!(status[1], "manual: 0 out of 1 instances running");

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn dispatch_to_unknown_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_from(&dir, &[("app", "sleep 30", 1, false)]).await;

        assert!(registry.start("ghost").await.is_err());
        assert!(registry.stop("ghost").await.is_err());
        assert!(registry.restart("ghost").await.is_err());
    }

    #[tokio::test]
    async fn start_stop_restart_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_from(&dir, &[("app", "sleep 30", 1, false)]).await;

        registry.start("app").await.expect("start");
        assert_eq!(registry.status()[0], "app: 1 out of 1 instances running");

        registry.restart("app").await.expect("restart");
        assert_eq!(registry.status()[0], "app: 1 out of 1 instances running");

        registry.stop("app").await.expect("stop");
        assert_eq!(registry.status()[0], "app: 0 out of 1 instances running");
    }

    #[tokio::test]
    async fn reload_applies_adds_updates_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_from(
            &dir,
            &[("keep", "sleep 30", 1, true), ("drop", "sleep 30", 1, true)],
        )
        .await;

        // keep grows to 2 replicas, drop disappears, fresh appears.
        write_config(
            dir.path(),
            &[("keep", "sleep 30", 2, true), ("fresh", "sleep 30", 1, true)],
        );
        registry.reload().await.expect("reload");

        let status = registry.status();
        assert_eq!(
            status,
            vec![
                "fresh: 1 out of 1 instances running",
                "keep: 2 out of 2 instances running",
            ]
        );

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn reload_with_invalid_config_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_from(&dir, &[("app", "sleep 30", 1, true)]).await;

        fs::write(dir.path().join("warden.toml"), "programs = 3").expect("write bad config");
        assert!(registry.reload().await.is_err());

        assert_eq!(
            registry.status(),
            vec!["app: 1 out of 1 instances running"]
        );

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_drains_every_engine() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_from(
            &dir,
            &[("one", "sleep 30", 1, true), ("two", "sleep 30", 2, true)],
        )
        .await;

        registry.stop_all().await;
        assert_eq!(registry.status()[0], "one: 0 out of 1 instances running");
        assert_eq!(registry.status()[1], "two: 0 out of 2 instances running");
    }

    #[tokio::test]
    async fn failed_initialize_stops_previously_started_engines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &[
                ("broken", "warden-no-such-binary", 1, true),
                ("alive", "sleep 30", 1, true),
            ],
        );
        let config = config::load_from_path(&path).expect("config loads");
        let mut registry = Registry::new(path, Logger::disabled());

        assert!(registry.initialize(&config).await.is_err());
        // Engines stay registered but nothing is left running.
        let drained = {
            let mut done = true;
            for line in registry.status() {
                done &= line.contains("0 out of");
            }
            done
        };
        assert!(drained, "every replica must be stopped after a failed init");
    }
}

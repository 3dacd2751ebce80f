use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spark_replays::analyzer::world::WorldModel;
use spark_replays::draw::Drawings;
use spark_replays::playback::PlaybackController;
use strum_macros::Display;
use tracing::{info, warn};

use crate::config::ViewerConfig;
use crate::draw_comm::DrawListener;
use crate::error::SessionError;
use crate::frame::FrameSnapshot;
use crate::server_comm::NetworkSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Mode {
    Live,
    Log,
}

enum Source {
    Live {
        network: NetworkSession,
        /// Missing when the drawing port was taken.
        draw_listener: Option<DrawListener>,
    },
    Log {
        player: PlaybackController,
    },
}

/// Owner of everything that belongs to one viewing mode.
///
/// Entering a mode builds a fresh world model and the source that feeds it;
/// the previous mode's source is shut down and its world dropped, so no
/// agent or team from one mode leaks into the other.
pub struct Session {
    config: ViewerConfig,
    world: Arc<Mutex<WorldModel>>,
    drawings: Arc<Drawings>,
    source: Source,
}

impl Session {
    /// Starts watching the configured server.
    pub fn live(config: ViewerConfig) -> Self {
        let drawings = Arc::new(Drawings::new());
        let world = Arc::new(Mutex::new(WorldModel::new()));
        let source = Self::live_source(&config, &world, &drawings);
        Session {
            config,
            world,
            drawings,
            source,
        }
    }

    /// Starts paused on the first frame of `path`.
    pub fn log(config: ViewerConfig, path: &Path) -> Result<Self, SessionError> {
        let drawings = Arc::new(Drawings::new());
        let world = Arc::new(Mutex::new(WorldModel::new()));
        let source = Self::log_source(&config, &world, &drawings, path)?;
        Ok(Session {
            config,
            world,
            drawings,
            source,
        })
    }

    fn live_source(
        config: &ViewerConfig,
        world: &Arc<Mutex<WorldModel>>,
        drawings: &Arc<Drawings>,
    ) -> Source {
        let mut network =
            NetworkSession::new(world.clone(), drawings.clone(), config.network_options());
        let draw_listener = match DrawListener::bind(
            config.networking.listen_port,
            drawings.clone(),
            network.recording(),
        ) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("not receiving drawings: {e}");
                None
            }
        };
        network.start_auto_connect();
        Source::Live {
            network,
            draw_listener,
        }
    }

    fn log_source(
        config: &ViewerConfig,
        world: &Arc<Mutex<WorldModel>>,
        drawings: &Arc<Drawings>,
        path: &Path,
    ) -> Result<Source, SessionError> {
        let mut player = PlaybackController::with_options(
            world.clone(),
            drawings.clone(),
            config.playback_options(),
        );
        player.open_file(path)?;
        Ok(Source::Log { player })
    }

    /// Switches to live mode. Does nothing if already live.
    pub fn enter_live(&mut self) {
        if self.mode() == Mode::Live {
            return;
        }
        self.shutdown_source();
        self.world = Arc::new(Mutex::new(WorldModel::new()));
        self.drawings.clear_all();
        self.source = Self::live_source(&self.config, &self.world, &self.drawings);
        info!("entered live mode");
    }

    /// Switches to playing `path`. On failure the current mode is kept.
    ///
    /// From log mode this still builds a fresh world; opening another log
    /// within the same player is [`PlaybackController::open_file`].
    pub fn enter_log(&mut self, path: &Path) -> Result<(), SessionError> {
        let world = Arc::new(Mutex::new(WorldModel::new()));
        let drawings = Arc::new(Drawings::new());
        let source = Self::log_source(&self.config, &world, &drawings, path)?;

        self.shutdown_source();
        self.world = world;
        self.drawings = drawings;
        self.source = source;
        info!("entered log mode with {}", path.display());
        Ok(())
    }

    fn shutdown_source(&mut self) {
        match &mut self.source {
            Source::Live {
                network,
                draw_listener,
            } => {
                network.disconnect();
                if let Some(listener) = draw_listener.as_mut() {
                    listener.shutdown();
                }
            }
            Source::Log { player } => player.close(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self.source {
            Source::Live { .. } => Mode::Live,
            Source::Log { .. } => Mode::Log,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// World of the current mode. Replaced on every mode switch.
    pub fn world(&self) -> &Arc<Mutex<WorldModel>> {
        &self.world
    }

    pub fn drawings(&self) -> &Arc<Drawings> {
        &self.drawings
    }

    pub fn network_mut(&mut self) -> Option<&mut NetworkSession> {
        match &mut self.source {
            Source::Live { network, .. } => Some(network),
            Source::Log { .. } => None,
        }
    }

    pub fn player(&self) -> Option<&PlaybackController> {
        match &self.source {
            Source::Log { player } => Some(player),
            Source::Live { .. } => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlaybackController> {
        match &mut self.source {
            Source::Log { player } => Some(player),
            Source::Live { .. } => None,
        }
    }

    /// Advances the current mode by `elapsed` wall time.
    pub fn update(&mut self, elapsed: Duration) -> Result<(), SessionError> {
        match &mut self.source {
            Source::Live { network, .. } => network.poll(Instant::now()),
            Source::Log { player } => player.tick(elapsed)?,
        }
        Ok(())
    }

    /// Consistent copy of the current frame for rendering.
    pub fn snapshot(&self) -> FrameSnapshot {
        let world = self.world.lock();
        FrameSnapshot::capture(&world, &self.drawings)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown_source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use spark_replays::playback::PlaybackState;
    use spark_replays::types::Side;

    fn offline_config() -> ViewerConfig {
        let mut config = ViewerConfig::default();
        config.networking.auto_connect = false;
        config.networking.listen_port = 0;
        config
    }

    fn write_log(team: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for frame in 0..10 {
            writeln!(
                file,
                "((team_left {team}) (time {}))(RSG 0 1)(\
                 (nd TRF (SLT 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0.5 1) \
                   (nd StaticMesh (load models/naobody.obj) (resetMaterials matNum2 matLeft))))",
                frame as f32 * 0.2
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn mode_switch_builds_a_fresh_world() {
        let log = write_log("A");
        let mut session = Session::log(offline_config(), log.path()).unwrap();
        assert_eq!(session.mode(), Mode::Log);
        let log_world = session.world().clone();
        assert_eq!(log_world.lock().team(Side::Left).len(), 1);

        session.enter_live();
        assert_eq!(session.mode(), Mode::Live);
        assert!(!Arc::ptr_eq(&log_world, session.world()));
        assert!(session.world().lock().team(Side::Left).is_empty());
        assert!(session.player().is_none());
        assert!(session.network_mut().is_some());
        let frame = session.snapshot();
        assert!(frame.agents.is_empty());
        assert_eq!(frame.score_line(), "- 0:0 -");
    }

    #[test]
    fn failed_log_switch_keeps_current_mode() {
        let log = write_log("A");
        let mut session = Session::log(offline_config(), log.path()).unwrap();
        session.player_mut().unwrap().seek(4).unwrap();
        let world = session.world().clone();

        let missing = Path::new("/nonexistent/match.log");
        assert!(session.enter_log(missing).is_err());
        assert!(Arc::ptr_eq(&world, session.world()));
        assert_eq!(session.player().unwrap().frame(), Some(4));

        let other = write_log("B");
        session.enter_log(other.path()).unwrap();
        assert!(!Arc::ptr_eq(&world, session.world()));
        let player = session.player().unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.frame(), Some(0));
        assert_eq!(
            session.world().lock().game_state().team_name(Side::Left),
            Some("B")
        );
    }

    #[test]
    fn update_drives_playback() {
        let log = write_log("A");
        let mut session = Session::log(offline_config(), log.path()).unwrap();
        session.player_mut().unwrap().play().unwrap();
        session.update(Duration::from_millis(400)).unwrap();
        assert_eq!(session.player().unwrap().frame(), Some(2));
        assert_eq!(session.snapshot().time.seconds(), 0.4);
    }
}

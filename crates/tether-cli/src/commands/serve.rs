//! JSON-lines bridge: one `FacadeRequest` per stdin line, one
//! `FacadeResponse` per stdout line, with target events interleaved.

use crate::setup::{self, GlobalOptions};
use anyhow::Result;
use tether_core::{FacadeRequest, FacadeResponse};
use tokio::io::{AsyncBufReadExt, BufReader};

pub fn execute(options: &GlobalOptions) -> Result<()> {
    let runtime = setup::runtime()?;

    runtime.block_on(async {
        let (context, facade) = setup::build_facade(options)?;
        let ceiling = context.config.shutdown_timeout();
        let shutdown = facade.registry().install_shutdown_hook(ceiling)?;

        let mut events = facade.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::debug!("Unserializable event: {}", e),
                }
            }
        });

        tracing::info!("Serving target requests on stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        let requests = async {
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<FacadeRequest>(&line) {
                    Ok(request) => facade.handle(request).await,
                    Err(e) => FacadeResponse::Error {
                        message: format!("invalid request: {}", e),
                    },
                };
                println!("{}", serde_json::to_string(&response)?);
            }
            Ok::<_, anyhow::Error>(())
        };

        tokio::select! {
            result = requests => {
                result?;
                tracing::info!("Input closed, shutting down");
                facade.registry().shutdown(ceiling).await;
            }
            _ = shutdown => {}
        }

        Ok(())
    })
}

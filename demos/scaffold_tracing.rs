use std::sync::Arc;

use scaffold_cell::{ExactlyOnceCell, WeakReuseCell};
use tracing_subscriber::EnvFilter;

struct Settings {
   region: &'static str,
}

struct Storage {
   region: &'static str,
}

#[derive(Default)]
struct RootScaffold {
   settings: ExactlyOnceCell<Settings>,
}

impl RootScaffold {
   fn settings(&self) -> &Settings {
      self.settings.value(|| Settings { region: "eu-west" })
   }
}

struct JobScaffold {
   root: Arc<RootScaffold>,
   storage: WeakReuseCell<Storage>,
}

impl JobScaffold {
   fn storage(&self) -> Arc<Storage> {
      self.storage.value(|| {
         Arc::new(Storage {
            region: self.root.settings().region,
         })
      })
   }
}

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")))
      .init();

   let root = Arc::new(RootScaffold::default());
   let job = JobScaffold {
      root: Arc::clone(&root),
      storage: WeakReuseCell::new(),
   };

   let storage = job.storage();
   tracing::info!(region = storage.region, "storage ready");
   drop(storage);

   // reclaimed, so this one is produced again and traced as a recreation
   let storage = job.storage();
   tracing::info!(region = storage.region, "storage ready again");
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scaffold_cell::ExactlyOnceCell;

struct Catalog {
   entries: Vec<String>,
}

struct ShopScaffold {
   loads: AtomicUsize,
   catalog: ExactlyOnceCell<Catalog>,
}

impl ShopScaffold {
   fn catalog(&self) -> &Catalog {
      self.catalog.value(|| {
         self.loads.fetch_add(1, Ordering::Relaxed);
         println!("Loading catalog...");
         std::thread::sleep(std::time::Duration::from_millis(50));
         Catalog {
            entries: vec!["tea".to_string(), "coffee".to_string()],
         }
      })
   }
}

fn main() {
   let scaffold = Arc::new(ShopScaffold {
      loads: AtomicUsize::new(0),
      catalog: ExactlyOnceCell::new(),
   });

   let threads: Vec<_> = (0..5)
      .map(|_| {
         let scaffold = Arc::clone(&scaffold);
         std::thread::spawn(move || {
            println!("Thread sees {} entries", scaffold.catalog().entries.len());
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(scaffold.loads.load(Ordering::Relaxed), 1);
   println!("Catalog: {:?}", scaffold.catalog().entries);
}

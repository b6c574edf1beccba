use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scaffold_cell::WeakReuseCell;

struct Widget {
   id: usize,
}

impl Drop for Widget {
   fn drop(&mut self) {
      println!("Widget {} released", self.id);
   }
}

#[derive(Default)]
struct UiScaffold {
   built: AtomicUsize,
   widget: WeakReuseCell<Widget>,
}

impl UiScaffold {
   fn widget(&self) -> Arc<Widget> {
      self.widget.value(|| {
         let id = self.built.fetch_add(1, Ordering::Relaxed) + 1;
         println!("Building widget {id}");
         Arc::new(Widget { id })
      })
   }
}

fn main() {
   let scaffold = UiScaffold::default();

   let first = scaffold.widget();
   let second = scaffold.widget();
   assert!(Arc::ptr_eq(&first, &second));
   println!("Both handles point at widget {}", first.id);

   drop((first, second));
   assert!(!scaffold.widget.is_live());

   let rebuilt = scaffold.widget();
   assert_eq!(rebuilt.id, 2);
   println!("Rebuilt as widget {}", rebuilt.id);
}

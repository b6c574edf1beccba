use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scaffold_cell::{ExactlyOnceCell, WeakReuseCell};
use tokio::time::{sleep, Duration};

struct Token(String);

struct Client {
   token: String,
}

#[derive(Default)]
struct ApiScaffold {
   fetches: AtomicUsize,
   token: ExactlyOnceCell<Token>,
   client: WeakReuseCell<Client>,
}

impl ApiScaffold {
   async fn token(&self) -> &Token {
      self
         .token
         .value_async(|| async {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            println!("Fetching token...");
            sleep(Duration::from_millis(50)).await;
            Token("secret".to_string())
         })
         .await
   }

   async fn client(&self) -> Arc<Client> {
      self
         .client
         .value_async(|| async {
            let token = self.token().await.0.clone();
            Arc::new(Client { token })
         })
         .await
   }
}

#[tokio::main]
async fn main() {
   let scaffold = Arc::new(ApiScaffold::default());

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         let scaffold = Arc::clone(&scaffold);
         tokio::spawn(async move { scaffold.client().await })
      })
      .collect();

   let mut clients = Vec::new();
   for t in tasks {
      clients.push(t.await.unwrap());
   }

   assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
   assert_eq!(scaffold.fetches.load(Ordering::Relaxed), 1);
   println!("Client authenticated with {}", clients[0].token);
}

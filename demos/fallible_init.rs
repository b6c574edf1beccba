use scaffold_cell::ExactlyOnceCell;

struct Connection {
   dsn: &'static str,
}

struct DbScaffold {
   connection: ExactlyOnceCell<Connection>,
}

impl DbScaffold {
   fn connection(&self, reachable: bool) -> Result<&Connection, &'static str> {
      self.connection.try_value(|| {
         println!("Connecting (reachable={reachable})...");
         if reachable {
            Ok(Connection { dsn: "postgres://db" })
         } else {
            Err("database unreachable")
         }
      })
   }
}

fn main() {
   let scaffold = DbScaffold {
      connection: ExactlyOnceCell::new(),
   };

   // First attempt fails and leaves the cell empty
   match scaffold.connection(false) {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {e}"),
   }
   assert!(!scaffold.connection.is_populated());

   // Second attempt succeeds
   match scaffold.connection(true) {
      Ok(conn) => println!("Connected to {}", conn.dsn),
      Err(_) => panic!("Should have succeeded"),
   }

   // Once populated, a failing producer is never consulted
   match scaffold.connection(false) {
      Ok(conn) => println!("Still connected to {}", conn.dsn),
      Err(_) => panic!("Should have returned the existing connection"),
   }
}

//! Basic usage example for `LocalShared`.
//!
//! Shows sharing a value between handles, aliasing a field of it and observing the ownership
//! group through a weak handle.

use std::fmt::Display;

use local_shared::LocalShared;

struct Document {
    title: String,
    pages: u32,
}

impl Drop for Document {
    fn drop(&mut self) {
        println!("Dropping document '{}'", self.title);
    }
}

fn main() {
    let document = LocalShared::new(Document {
        title: "Handbook".to_string(),
        pages: 120,
    });

    let reader = document.clone();
    println!("Handles in the group: {}", document.local_use_count());

    // Handles to parts of the document keep the whole document alive.
    let title = document.map(|doc| &doc.title);
    let pages: LocalShared<dyn Display> = document.map(|doc| &doc.pages as &dyn Display);

    let observer = document.downgrade();

    drop(document);
    drop(reader);

    println!("Title: {}", *title);
    println!("Pages: {}", &*pages);
    println!("Handles in the group: {}", title.local_use_count());

    drop(title);
    drop(pages);

    println!("Observer sees an expired group: {}", observer.expired());
}

//! Basic stream example: publish values, derive a filtered view, and collect
//! the result.
//!
//! ```bash
//! cargo run --example basic_stream
//! ```

use rill::prelude::*;

fn main() -> Result<(), StreamError> {
    let reactor = Reactor::new();
    let publisher = Publisher::new(&reactor.handle());

    // Values published before anyone listens are buffered.
    for i in 0..10 {
        publisher.add(i)?;
    }
    publisher.close();
    println!("Published 0..10 and closed");

    // Derive: keep the even values, square them, stop after three.
    let derived = publisher
        .stream()
        .where_(|v| v % 2 == 0)
        .map(|v| v * v)
        .take(3);

    let values = reactor.block_on(derived.to_vec())?;
    println!("Collected: {values:?}");
    assert_eq!(values, vec![0, 4, 16]);

    Ok(())
}

//! Broadcast example: fan one producer out to several listeners.
//!
//! Broadcast streams never buffer, so a listener that attaches after a value
//! was published has missed it for good.
//!
//! ```bash
//! cargo run --example broadcast_fanout
//! ```

use rill::prelude::*;

fn main() -> Result<(), StreamError> {
    let reactor = Reactor::new();
    let publisher = Publisher::broadcast(&reactor.handle());
    let stream = publisher.stream();

    let early = Rc::new(RefCell::new(Vec::new()));
    {
        let early = Rc::clone(&early);
        stream.listen(
            move |v: &'static str| early.borrow_mut().push(v),
            ListenOptions::new(),
        )?;
    }

    publisher.add("foo")?;
    reactor.run_until_idle();

    // This listener attaches after "foo" was emitted and never sees it.
    let late = Rc::new(RefCell::new(Vec::new()));
    {
        let late = Rc::clone(&late);
        stream.listen(
            move |v| late.borrow_mut().push(v),
            ListenOptions::new(),
        )?;
    }

    publisher.add("bar")?;
    publisher.close();
    reactor.run_until_idle();

    println!("early listener saw: {:?}", early.borrow());
    println!("late listener saw:  {:?}", late.borrow());
    assert_eq!(*early.borrow(), vec!["foo", "bar"]);
    assert_eq!(*late.borrow(), vec!["bar"]);

    Ok(())
}

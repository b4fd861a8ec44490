//! Command table and the reference command set.
//!
//! Dispatch is a case-sensitive scan of a static table; clients send command
//! names lowercase. Every entry carries an exact arity (command name
//! included) which the dispatcher checks before calling the handler, so
//! handlers can index their arguments directly.
//!
//! Adding a command means adding one [`Command`] row and its handler.

use crate::protocol::reply;
use crate::reactor::now_ms;
use crate::server::client::Client;
use crate::storage::db::Db;
use crate::storage::object::Value;
use bytes::Bytes;

type CommandProc = fn(&mut Db, &mut Client, &[Bytes]);

/// One entry in the static command table.
pub struct Command {
    pub name: &'static str,
    /// Exact argument count, command name included.
    pub arity: usize,
    proc: CommandProc,
}

impl Command {
    pub fn call(&self, db: &mut Db, client: &mut Client, args: &[Bytes]) {
        (self.proc)(db, client, args)
    }
}

static COMMAND_TABLE: &[Command] = &[
    Command {
        name: "get",
        arity: 2,
        proc: get_command,
    },
    Command {
        name: "set",
        arity: 3,
        proc: set_command,
    },
    Command {
        name: "expire",
        arity: 3,
        proc: expire_command,
    },
];

/// Case-sensitive lookup in the command table.
pub fn lookup(name: &str) -> Option<&'static Command> {
    COMMAND_TABLE.iter().find(|cmd| cmd.name == name)
}

/// `get key` — null bulk when the key is missing or expired, an error for
/// non-string values, otherwise the value as a bulk string.
fn get_command(db: &mut Db, client: &mut Client, args: &[Bytes]) {
    match db.lookup_read(&args[1]) {
        None => client.add_reply(reply::null_bulk()),
        Some(Value::Str(data)) => {
            let frame = reply::bulk(data);
            client.add_reply(frame);
        }
        Some(_) => client.add_reply(reply::error("wrong type")),
    }
}

/// `set key value` — upsert; any expiration on the key is dropped, so the
/// freshly written value is permanent until a new `expire`.
fn set_command(db: &mut Db, client: &mut Client, args: &[Bytes]) {
    let key = args[1].clone();
    db.data.set(key.clone(), Value::Str(args[2].clone()));
    let _ = db.expire.delete(&key);
    client.add_reply(reply::ok());
}

/// `expire key seconds` — attaches an absolute deadline of now plus the
/// given seconds. Unparsable seconds read as 0, expiring the key at once.
fn expire_command(db: &mut Db, client: &mut Client, args: &[Bytes]) {
    let seconds = Value::Str(args[2].clone()).as_int();
    let deadline = now_ms() + seconds * 1000;
    db.set_expire(args[1].clone(), deadline);
    client.add_reply(reply::ok());
}

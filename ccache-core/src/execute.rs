//! # Command Dispatch
//!
//! `Db::execute` is the single entry point the wire layer calls: it owns
//! the transaction state machine (queue while buffering, EXEC under the
//! write barrier) and routes every other command through the dispatch
//! table below. Argument parsing and reply shaping happen here; the
//! engines stay typed.
//!
//! Binary dump chunks (BF.SCANDUMP and friends) travel hex-encoded, since
//! command arguments are UTF-8 strings end to end.

use std::sync::atomic::Ordering;
use std::time::Duration;

use ccache_common::{format_float, CacheError, CacheResult, Reply};

use crate::db::Db;
use crate::engines::bitmap::{BitOp, BitfieldCmd, FieldSpec, Overflow};
use crate::engines::geo::{GeoBy, GeoFrom, GeoPoint, GeoSort, GeoUnit};
use crate::engines::list::InsertWhere;
use crate::engines::stream::{StreamEntry, StreamId, TrimStrategy};
use crate::engines::zset::{LexBound, ScoreBound};
use crate::expire::ExpireMode;
use crate::txn::SessionId;

impl Db {
    /// Executes one named command for `session`. Command names are
    /// case-insensitive; every operation of the engine surface is reachable
    /// from here.
    pub fn execute(&self, session: SessionId, name: &str, args: &[String]) -> Reply {
        self.stats.commands.fetch_add(1, Ordering::Relaxed);
        let cmd = name.to_ascii_uppercase();

        match cmd.as_str() {
            "MULTI" => match self.sessions.begin_multi(session) {
                Ok(()) => Reply::ok(),
                Err(err) => err.into(),
            },
            "DISCARD" => match self.sessions.discard(session) {
                Ok(()) => Reply::ok(),
                Err(err) => err.into(),
            },
            "WATCH" => self.cmd_watch(session, args),
            "UNWATCH" => {
                self.sessions.unwatch(session);
                Reply::ok()
            }
            "EXEC" => self.cmd_exec(session),
            _ => {
                if self.sessions.is_buffering(session) {
                    self.sessions.queue(session, cmd, args.to_vec());
                    return Reply::Simple("QUEUED".to_string());
                }
                let _foreground = self.barrier.read();
                self.dispatch(&cmd, args)
            }
        }
    }

    fn cmd_watch(&self, session: SessionId, args: &[String]) -> Reply {
        if args.is_empty() {
            return CacheError::WrongArity("watch".to_string()).into();
        }
        let observed = args
            .iter()
            .map(|key| (key.clone(), self.versions.read(key)))
            .collect();
        match self.sessions.watch(session, observed) {
            Ok(()) => Reply::ok(),
            Err(err) => err.into(),
        }
    }

    fn cmd_exec(&self, session: SessionId) -> Reply {
        let state = match self.sessions.take_exec(session) {
            Ok(state) => state,
            Err(err) => return err.into(),
        };

        // Serialization barrier: no foreground command runs concurrently.
        let _barrier = self.barrier.write();
        for (key, observed) in &state.watches {
            if self.versions.read(key) != *observed {
                self.stats.exec_aborts.fetch_add(1, Ordering::Relaxed);
                return Reply::NullArray;
            }
        }

        let replies = state
            .queued
            .iter()
            .map(|queued| self.dispatch(&queued.name, &queued.args))
            .collect();
        Reply::Array(replies)
    }

    fn dispatch(&self, cmd: &str, args: &[String]) -> Reply {
        self.try_dispatch(cmd, args).unwrap_or_else(Reply::from)
    }

    fn try_dispatch(&self, cmd: &str, args: &[String]) -> CacheResult<Reply> {
        match cmd {
            // ---- connection / generic ---------------------------------
            "PING" => Ok(match args.first() {
                None => Reply::Simple("PONG".to_string()),
                Some(msg) => Reply::bulk(msg.clone()),
            }),
            "ECHO" => {
                need(cmd, args, 1)?;
                Ok(Reply::bulk(args[0].clone()))
            }
            "DEL" | "UNLINK" => {
                need_min(cmd, args, 1)?;
                Ok(Reply::Int(self.del(args)))
            }
            "EXISTS" => {
                need_min(cmd, args, 1)?;
                Ok(Reply::Int(self.exists(args)))
            }
            "TYPE" => {
                need(cmd, args, 1)?;
                Ok(Reply::Simple(
                    self.type_of(&args[0])
                        .map(|kind| kind.type_name().to_string())
                        .unwrap_or_else(|| "none".to_string()),
                ))
            }
            "KEYS" => {
                need(cmd, args, 1)?;
                Ok(bulk_array(self.keys(&args[0])))
            }
            "SCAN" => {
                need_min(cmd, args, 1)?;
                let cursor = parse_u64(&args[0])?;
                let (pattern, count) = scan_options(&args[1..])?;
                let (next, keys) = self.scan(cursor, pattern.as_deref(), count);
                Ok(scan_reply(next, bulk_array(keys)))
            }
            "RANDOMKEY" => Ok(opt_bulk(self.random_key())),
            "RENAME" => {
                need(cmd, args, 2)?;
                self.rename(&args[0], &args[1])?;
                Ok(Reply::ok())
            }
            "DBSIZE" => Ok(Reply::Int(self.dbsize())),
            "FLUSHALL" | "FLUSHDB" => {
                self.flush_all();
                Ok(Reply::ok())
            }
            "EXPIRE" | "PEXPIRE" => {
                need_min(cmd, args, 2)?;
                let magnitude = parse_u64(&args[1])?;
                let ttl = if cmd == "EXPIRE" {
                    Duration::from_secs(magnitude)
                } else {
                    Duration::from_millis(magnitude)
                };
                let mode = expire_mode(args.get(2))?;
                Ok(Reply::Int(i64::from(self.expire_key(&args[0], ttl, mode))))
            }
            "TTL" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.ttl(&args[0])))
            }
            "PTTL" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.pttl(&args[0])))
            }
            "PERSIST" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(i64::from(self.persist(&args[0]))))
            }
            "INFO" => Ok(Reply::bulk(self.info_text())),
            "MEMORY" => self.memory_command(args),

            // ---- strings ----------------------------------------------
            "GET" => {
                need(cmd, args, 1)?;
                Ok(opt_bulk(self.get(&args[0])?))
            }
            "SET" => self.set_command(args),
            "SETNX" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.set_nx(&args[0], args[1].clone())?)))
            }
            "SETEX" => {
                need(cmd, args, 3)?;
                let secs = parse_u64(&args[1])?;
                self.set_ex(&args[0], args[2].clone(), Duration::from_secs(secs))?;
                Ok(Reply::ok())
            }
            "GETSET" => {
                need(cmd, args, 2)?;
                Ok(opt_bulk(self.get_set(&args[0], args[1].clone())?))
            }
            "GETDEL" => {
                need(cmd, args, 1)?;
                Ok(opt_bulk(self.get_del(&args[0])?))
            }
            "APPEND" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(self.append(&args[0], &args[1])?))
            }
            "STRLEN" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.strlen(&args[0])?))
            }
            "GETRANGE" => {
                need(cmd, args, 3)?;
                let (start, stop) = (parse_i64(&args[1])?, parse_i64(&args[2])?);
                Ok(Reply::bulk(self.get_range(&args[0], start, stop)?))
            }
            "SETRANGE" => {
                need(cmd, args, 3)?;
                let offset = parse_u64(&args[1])? as usize;
                Ok(Reply::Int(self.set_range(&args[0], offset, &args[2])?))
            }
            "INCR" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.incr(&args[0])?))
            }
            "DECR" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.decr(&args[0])?))
            }
            "INCRBY" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(self.incr_by(&args[0], parse_i64(&args[1])?)?))
            }
            "DECRBY" => {
                need(cmd, args, 2)?;
                let delta = parse_i64(&args[1])?
                    .checked_neg()
                    .ok_or(CacheError::Overflow)?;
                Ok(Reply::Int(self.incr_by(&args[0], delta)?))
            }
            "INCRBYFLOAT" => {
                need(cmd, args, 2)?;
                let next = self.incr_by_float(&args[0], parse_f64(&args[1])?)?;
                Ok(Reply::from_float(next))
            }
            "MGET" => {
                need_min(cmd, args, 1)?;
                Ok(Reply::Array(
                    self.mget(args).into_iter().map(opt_bulk).collect(),
                ))
            }
            "MSET" => {
                if args.is_empty() || args.len() % 2 != 0 {
                    return Err(CacheError::WrongArity("mset".to_string()));
                }
                let pairs: Vec<(String, String)> = args
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                self.mset(&pairs)?;
                Ok(Reply::ok())
            }

            // ---- hashes -----------------------------------------------
            "HSET" | "HMSET" => {
                need_min(cmd, args, 3)?;
                if args[1..].len() % 2 != 0 {
                    return Err(CacheError::WrongArity(cmd.to_lowercase()));
                }
                let pairs: Vec<(String, String)> = args[1..]
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                let created = self.hset(&args[0], &pairs)?;
                Ok(if cmd == "HMSET" {
                    Reply::ok()
                } else {
                    Reply::Int(created)
                })
            }
            "HSETNX" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(i64::from(self.hset_nx(&args[0], &args[1], &args[2])?)))
            }
            "HGET" => {
                need(cmd, args, 2)?;
                Ok(opt_bulk(self.hget(&args[0], &args[1])?))
            }
            "HGETALL" => {
                need(cmd, args, 1)?;
                let all = self.hgetall(&args[0])?;
                let mut fields: Vec<&String> = all.keys().collect();
                fields.sort();
                let mut flat = Vec::with_capacity(all.len() * 2);
                for field in fields {
                    flat.push(Reply::bulk(field.clone()));
                    flat.push(Reply::bulk(all[field].clone()));
                }
                Ok(Reply::Array(flat))
            }
            "HDEL" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.hdel(&args[0], &args[1..])?))
            }
            "HEXISTS" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.hexists(&args[0], &args[1])?)))
            }
            "HINCRBY" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(self.hincr_by(&args[0], &args[1], parse_i64(&args[2])?)?))
            }
            "HINCRBYFLOAT" => {
                need(cmd, args, 3)?;
                let next = self.hincr_by_float(&args[0], &args[1], parse_f64(&args[2])?)?;
                Ok(Reply::from_float(next))
            }
            "HLEN" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.hlen(&args[0])?))
            }
            "HKEYS" => {
                need(cmd, args, 1)?;
                Ok(bulk_array(self.hkeys(&args[0])?))
            }
            "HVALS" => {
                need(cmd, args, 1)?;
                Ok(bulk_array(self.hvals(&args[0])?))
            }
            "HMGET" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.hmget(&args[0], &args[1..])?
                        .into_iter()
                        .map(opt_bulk)
                        .collect(),
                ))
            }
            "HRANDFIELD" => {
                need_min(cmd, args, 1)?;
                let count = args.get(1).map(|c| parse_i64(c)).transpose()?.unwrap_or(1);
                let fields =
                    self.hrandfield(&args[0], count.unsigned_abs() as usize, count >= 0)?;
                Ok(bulk_array(fields))
            }
            "HSCAN" => {
                need_min(cmd, args, 2)?;
                let cursor = parse_u64(&args[1])?;
                let (pattern, count) = scan_options(&args[2..])?;
                let (next, pairs) = self.hscan(&args[0], cursor, pattern.as_deref(), count)?;
                let mut flat = Vec::with_capacity(pairs.len() * 2);
                for (field, value) in pairs {
                    flat.push(Reply::bulk(field));
                    flat.push(Reply::bulk(value));
                }
                Ok(scan_reply(next, Reply::Array(flat)))
            }

            // ---- lists ------------------------------------------------
            "LPUSH" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.lpush(&args[0], &args[1..])?))
            }
            "RPUSH" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.rpush(&args[0], &args[1..])?))
            }
            "LPUSHX" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.lpushx(&args[0], &args[1..])?))
            }
            "RPUSHX" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.rpushx(&args[0], &args[1..])?))
            }
            "LPOP" | "RPOP" => {
                need_min(cmd, args, 1)?;
                let explicit = args.get(1).map(|c| parse_u64(c)).transpose()?;
                let count = explicit.unwrap_or(1) as usize;
                let mut popped = if cmd == "LPOP" {
                    self.lpop(&args[0], count)?
                } else {
                    self.rpop(&args[0], count)?
                };
                Ok(match explicit {
                    None => opt_bulk(popped.pop()),
                    Some(_) => bulk_array(popped),
                })
            }
            "LRANGE" => {
                need(cmd, args, 3)?;
                let (start, stop) = (parse_i64(&args[1])?, parse_i64(&args[2])?);
                Ok(bulk_array(self.lrange(&args[0], start, stop)?))
            }
            "LINDEX" => {
                need(cmd, args, 2)?;
                Ok(opt_bulk(self.lindex(&args[0], parse_i64(&args[1])?)?))
            }
            "LSET" => {
                need(cmd, args, 3)?;
                self.lset(&args[0], parse_i64(&args[1])?, args[2].clone())?;
                Ok(Reply::ok())
            }
            "LINSERT" => {
                need(cmd, args, 4)?;
                let place = match args[1].to_ascii_uppercase().as_str() {
                    "BEFORE" => InsertWhere::Before,
                    "AFTER" => InsertWhere::After,
                    _ => return Err(CacheError::Syntax),
                };
                Ok(Reply::Int(self.linsert(&args[0], place, &args[2], args[3].clone())?))
            }
            "LREM" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(self.lrem(&args[0], parse_i64(&args[1])?, &args[2])?))
            }
            "LTRIM" => {
                need(cmd, args, 3)?;
                self.ltrim(&args[0], parse_i64(&args[1])?, parse_i64(&args[2])?)?;
                Ok(Reply::ok())
            }
            "LLEN" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.llen(&args[0])?))
            }
            "LPOS" => {
                need(cmd, args, 2)?;
                Ok(match self.lpos(&args[0], &args[1])? {
                    Some(index) => Reply::Int(index),
                    None => Reply::Null,
                })
            }

            // ---- sets -------------------------------------------------
            "SADD" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.sadd(&args[0], &args[1..])?))
            }
            "SREM" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.srem(&args[0], &args[1..])?))
            }
            "SISMEMBER" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.sismember(&args[0], &args[1])?)))
            }
            "SMISMEMBER" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.smismember(&args[0], &args[1..])?
                        .into_iter()
                        .map(|b| Reply::Int(i64::from(b)))
                        .collect(),
                ))
            }
            "SMEMBERS" => {
                need(cmd, args, 1)?;
                Ok(bulk_array(self.smembers(&args[0])?))
            }
            "SMEMBERSPATTERN" => {
                need(cmd, args, 2)?;
                Ok(bulk_array(self.smembers_pattern(&args[0], &args[1])?))
            }
            "SCARD" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.scard(&args[0])?))
            }
            "SPOP" => {
                need_min(cmd, args, 1)?;
                let explicit = args.get(1).map(|c| parse_u64(c)).transpose()?;
                let mut popped = self.spop(&args[0], explicit.unwrap_or(1) as usize)?;
                Ok(match explicit {
                    None => opt_bulk(popped.pop()),
                    Some(_) => bulk_array(popped),
                })
            }
            "SRANDMEMBER" => {
                need_min(cmd, args, 1)?;
                let count = args.get(1).map(|c| parse_i64(c)).transpose()?;
                match count {
                    None => {
                        let mut members = self.srandmember(&args[0], 1, false)?;
                        Ok(opt_bulk(members.pop()))
                    }
                    Some(count) => Ok(bulk_array(self.srandmember(
                        &args[0],
                        count.unsigned_abs() as usize,
                        count < 0,
                    )?)),
                }
            }
            "SMOVE" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(i64::from(self.smove(&args[0], &args[1], &args[2])?)))
            }
            "SDIFF" => {
                need_min(cmd, args, 1)?;
                Ok(bulk_array(self.sdiff(args)?))
            }
            "SINTER" => {
                need_min(cmd, args, 1)?;
                Ok(bulk_array(self.sinter(args)?))
            }
            "SUNION" => {
                need_min(cmd, args, 1)?;
                Ok(bulk_array(self.sunion(args)?))
            }
            "SDIFFSTORE" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.sdiffstore(&args[0], &args[1..])?))
            }
            "SINTERSTORE" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.sinterstore(&args[0], &args[1..])?))
            }
            "SUNIONSTORE" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.sunionstore(&args[0], &args[1..])?))
            }
            "SDIFFSTOREDEL" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.sdiffstore_del(&args[0], &args[1..])?))
            }
            "SINTERCARD" => {
                need_min(cmd, args, 2)?;
                let (keys, limit) = numkeys_with_limit(cmd, args)?;
                Ok(Reply::Int(self.sintercard(&keys, limit)?))
            }
            "SSCAN" => {
                need_min(cmd, args, 2)?;
                let cursor = parse_u64(&args[1])?;
                let (pattern, count) = scan_options(&args[2..])?;
                let (next, members) = self.sscan(&args[0], cursor, pattern.as_deref(), count)?;
                Ok(scan_reply(next, bulk_array(members)))
            }

            // ---- sorted sets ------------------------------------------
            "ZADD" => {
                need_min(cmd, args, 3)?;
                if args[1..].len() % 2 != 0 {
                    return Err(CacheError::Syntax);
                }
                let mut pairs = Vec::with_capacity(args[1..].len() / 2);
                for pair in args[1..].chunks(2) {
                    pairs.push((parse_score(&pair[0])?, pair[1].clone()));
                }
                Ok(Reply::Int(self.zadd(&args[0], &pairs)?))
            }
            "ZREM" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Int(self.zrem(&args[0], &args[1..])?))
            }
            "ZSCORE" => {
                need(cmd, args, 2)?;
                Ok(match self.zscore(&args[0], &args[1])? {
                    Some(score) => Reply::from_float(score),
                    None => Reply::Null,
                })
            }
            "ZCARD" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.zcard(&args[0])?))
            }
            "ZCOUNT" => {
                need(cmd, args, 3)?;
                let (min, max) = (ScoreBound::parse(&args[1])?, ScoreBound::parse(&args[2])?);
                Ok(Reply::Int(self.zcount(&args[0], min, max)?))
            }
            "ZINCRBY" => {
                need(cmd, args, 3)?;
                let next = self.zincrby(&args[0], parse_score(&args[1])?, &args[2])?;
                Ok(Reply::from_float(next))
            }
            "ZRANK" | "ZREVRANK" => {
                need(cmd, args, 2)?;
                Ok(match self.zrank(&args[0], &args[1], cmd == "ZREVRANK")? {
                    Some(rank) => Reply::Int(rank),
                    None => Reply::Null,
                })
            }
            "ZRANGE" | "ZREVRANGE" => {
                need_min(cmd, args, 3)?;
                let (start, stop) = (parse_i64(&args[1])?, parse_i64(&args[2])?);
                let mut rev = cmd == "ZREVRANGE";
                let mut withscores = false;
                for flag in &args[3..] {
                    match flag.to_ascii_uppercase().as_str() {
                        "WITHSCORES" => withscores = true,
                        "REV" if cmd == "ZRANGE" => rev = true,
                        _ => return Err(CacheError::Syntax),
                    }
                }
                Ok(scored_array(self.zrange(&args[0], start, stop, rev)?, withscores))
            }
            "ZRANGEBYSCORE" | "ZREVRANGEBYSCORE" => {
                need_min(cmd, args, 3)?;
                let rev = cmd == "ZREVRANGEBYSCORE";
                // The rev variant takes (max, min) order on the wire.
                let (lo, hi) = if rev {
                    (ScoreBound::parse(&args[2])?, ScoreBound::parse(&args[1])?)
                } else {
                    (ScoreBound::parse(&args[1])?, ScoreBound::parse(&args[2])?)
                };
                let withscores = flag_present(&args[3..], "WITHSCORES")?;
                Ok(scored_array(
                    self.zrange_by_score(&args[0], lo, hi, rev)?,
                    withscores,
                ))
            }
            "ZRANGEBYLEX" | "ZREVRANGEBYLEX" => {
                need(cmd, args, 3)?;
                let rev = cmd == "ZREVRANGEBYLEX";
                let (lo, hi) = if rev {
                    (LexBound::parse(&args[2])?, LexBound::parse(&args[1])?)
                } else {
                    (LexBound::parse(&args[1])?, LexBound::parse(&args[2])?)
                };
                Ok(scored_array(
                    self.zrange_by_lex(&args[0], &lo, &hi, rev)?,
                    false,
                ))
            }
            "ZLEXCOUNT" => {
                need(cmd, args, 3)?;
                let (lo, hi) = (LexBound::parse(&args[1])?, LexBound::parse(&args[2])?);
                Ok(Reply::Int(self.zlexcount(&args[0], &lo, &hi)?))
            }
            "ZREMRANGEBYRANK" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(self.zremrange_by_rank(
                    &args[0],
                    parse_i64(&args[1])?,
                    parse_i64(&args[2])?,
                )?))
            }
            "ZREMRANGEBYSCORE" => {
                need(cmd, args, 3)?;
                let (min, max) = (ScoreBound::parse(&args[1])?, ScoreBound::parse(&args[2])?);
                Ok(Reply::Int(self.zremrange_by_score(&args[0], min, max)?))
            }
            "ZREMRANGEBYLEX" => {
                need(cmd, args, 3)?;
                let (lo, hi) = (LexBound::parse(&args[1])?, LexBound::parse(&args[2])?);
                Ok(Reply::Int(self.zremrange_by_lex(&args[0], &lo, &hi)?))
            }
            "ZPOPMIN" | "ZPOPMAX" => {
                need_min(cmd, args, 1)?;
                let count = args.get(1).map(|c| parse_u64(c)).transpose()?.unwrap_or(1);
                let popped = self.zpop(&args[0], count as usize, cmd == "ZPOPMAX")?;
                Ok(scored_array(popped, true))
            }
            "ZRANDMEMBER" => {
                need_min(cmd, args, 1)?;
                let count = args.get(1).map(|c| parse_i64(c)).transpose()?;
                let withscores = flag_present(args.get(2..).unwrap_or(&[]), "WITHSCORES")?;
                match count {
                    None => {
                        let mut members = self.zrandmember(&args[0], 1, false)?;
                        Ok(opt_bulk(members.pop().map(|(m, _)| m)))
                    }
                    Some(count) => Ok(scored_array(
                        self.zrandmember(&args[0], count.unsigned_abs() as usize, count < 0)?,
                        withscores,
                    )),
                }
            }
            "ZSCAN" => {
                need_min(cmd, args, 2)?;
                let cursor = parse_u64(&args[1])?;
                let (pattern, count) = scan_options(&args[2..])?;
                let (next, pairs) = self.zscan(&args[0], cursor, pattern.as_deref(), count)?;
                Ok(scan_reply(next, scored_array(pairs, true)))
            }
            "ZRANGESTORE" => {
                need(cmd, args, 4)?;
                Ok(Reply::Int(self.zrangestore(
                    &args[0],
                    &args[1],
                    parse_i64(&args[2])?,
                    parse_i64(&args[3])?,
                )?))
            }
            "ZUNION" | "ZINTER" | "ZDIFF" => {
                need_min(cmd, args, 2)?;
                let (keys, weights, withscores) = combine_args(cmd, args, 0)?;
                let combined = match cmd {
                    "ZUNION" => self.zunion(&keys, weights.as_deref())?,
                    "ZINTER" => self.zinter(&keys, weights.as_deref())?,
                    _ => self.zdiff(&keys)?,
                };
                Ok(scored_array(combined, withscores))
            }
            "ZUNIONSTORE" | "ZINTERSTORE" | "ZDIFFSTORE" => {
                need_min(cmd, args, 3)?;
                let (keys, weights, _) = combine_args(cmd, args, 1)?;
                let stored = match cmd {
                    "ZUNIONSTORE" => self.zunionstore(&args[0], &keys, weights.as_deref())?,
                    "ZINTERSTORE" => self.zinterstore(&args[0], &keys, weights.as_deref())?,
                    _ => self.zdiffstore(&args[0], &keys)?,
                };
                Ok(Reply::Int(stored))
            }
            "ZINTERCARD" => {
                need_min(cmd, args, 2)?;
                let (keys, limit) = numkeys_with_limit(cmd, args)?;
                Ok(Reply::Int(self.zintercard(&keys, limit)?))
            }

            // ---- streams ----------------------------------------------
            "XADD" => {
                need_min(cmd, args, 4)?;
                if args[2..].len() % 2 != 0 {
                    return Err(CacheError::WrongArity("xadd".to_string()));
                }
                let fields: Vec<(String, String)> = args[2..]
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                let id = self.xadd(&args[0], &args[1], fields)?;
                Ok(Reply::bulk(id.to_string()))
            }
            "XDEL" => {
                need_min(cmd, args, 2)?;
                let ids = parse_ids(&args[1..])?;
                Ok(Reply::Int(self.xdel(&args[0], &ids)?))
            }
            "XLEN" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.xlen(&args[0])?))
            }
            "XRANGE" | "XREVRANGE" => {
                need_min(cmd, args, 3)?;
                let rev = cmd == "XREVRANGE";
                let (start, end) = if rev {
                    (args[2].as_str(), args[1].as_str())
                } else {
                    (args[1].as_str(), args[2].as_str())
                };
                let count = trailing_count(&args[3..])?;
                Ok(entries_array(self.xrange(&args[0], start, end, count, rev)?))
            }
            "XREAD" => {
                let (count, streams) = xread_args(args)?;
                let results = self.xread(&streams, count)?;
                if results.is_empty() {
                    return Ok(Reply::NullArray);
                }
                Ok(Reply::Array(
                    results
                        .into_iter()
                        .map(|(key, entries)| {
                            Reply::Array(vec![Reply::bulk(key), entries_array(entries)])
                        })
                        .collect(),
                ))
            }
            "XREADGROUP" => {
                // GROUP <group> <consumer> [COUNT n] STREAMS key id
                need_min(cmd, args, 6)?;
                if !args[0].eq_ignore_ascii_case("GROUP") {
                    return Err(CacheError::Syntax);
                }
                let (group, consumer) = (&args[1], &args[2]);
                let (count, streams) = xread_args(&args[3..])?;
                let (key, after) = streams
                    .first()
                    .ok_or(CacheError::Syntax)?;
                let entries = self.xreadgroup(key, group, consumer, after, count)?;
                if entries.is_empty() {
                    return Ok(Reply::NullArray);
                }
                Ok(Reply::Array(vec![Reply::Array(vec![
                    Reply::bulk(key.clone()),
                    entries_array(entries),
                ])]))
            }
            "XTRIM" => {
                need_min(cmd, args, 3)?;
                let mut idx = 1;
                let strategy_name = args[idx].to_ascii_uppercase();
                idx += 1;
                if args.get(idx).map(|a| a == "~" || a == "=").unwrap_or(false) {
                    idx += 1;
                }
                let threshold = args.get(idx).ok_or(CacheError::Syntax)?;
                let strategy = match strategy_name.as_str() {
                    "MAXLEN" => TrimStrategy::MaxLen(parse_u64(threshold)? as usize),
                    "MINID" => TrimStrategy::MinId(StreamId::parse(threshold, 0)?),
                    _ => return Err(CacheError::Syntax),
                };
                Ok(Reply::Int(self.xtrim(&args[0], strategy)?))
            }
            "XSETID" => {
                need(cmd, args, 2)?;
                self.xsetid(&args[0], StreamId::parse(&args[1], 0)?)?;
                Ok(Reply::ok())
            }
            "XGROUP" => self.xgroup_command(args),
            "XACK" => {
                need_min(cmd, args, 3)?;
                let ids = parse_ids(&args[2..])?;
                Ok(Reply::Int(self.xack(&args[0], &args[1], &ids)?))
            }
            "XCLAIM" => {
                need_min(cmd, args, 5)?;
                let min_idle = Duration::from_millis(parse_u64(&args[3])?);
                let ids = parse_ids(&args[4..])?;
                let claimed = self.xclaim(&args[0], &args[1], &args[2], min_idle, &ids)?;
                Ok(entries_array(claimed))
            }
            "XAUTOCLAIM" => {
                need_min(cmd, args, 5)?;
                let min_idle = Duration::from_millis(parse_u64(&args[3])?);
                let start = if args[4] == "0" {
                    StreamId::ZERO
                } else {
                    StreamId::parse(&args[4], 0)?
                };
                let count = trailing_count(&args[5..])?.unwrap_or(100);
                let (cursor, claimed) =
                    self.xautoclaim(&args[0], &args[1], &args[2], min_idle, start, count)?;
                Ok(Reply::Array(vec![
                    Reply::bulk(cursor.to_string()),
                    entries_array(claimed),
                ]))
            }
            "XPENDING" => {
                need(cmd, args, 2)?;
                let (total, min, max, per_consumer) = self.xpending(&args[0], &args[1])?;
                Ok(Reply::Array(vec![
                    Reply::Int(total),
                    opt_bulk(min.map(|id| id.to_string())),
                    opt_bulk(max.map(|id| id.to_string())),
                    Reply::Array(
                        per_consumer
                            .into_iter()
                            .map(|(consumer, count)| {
                                Reply::Array(vec![
                                    Reply::bulk(consumer),
                                    Reply::bulk(count.to_string()),
                                ])
                            })
                            .collect(),
                    ),
                ]))
            }
            "XINFO" => self.xinfo_command(args),

            // ---- bitmaps ----------------------------------------------
            "SETBIT" => {
                need(cmd, args, 3)?;
                let offset = parse_u64(&args[1])?;
                let bit = match args[2].as_str() {
                    "0" => false,
                    "1" => true,
                    _ => return Err(CacheError::other("bit is not an integer or out of range")),
                };
                Ok(Reply::Int(self.setbit(&args[0], offset, bit)?))
            }
            "GETBIT" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(self.getbit(&args[0], parse_u64(&args[1])?)?))
            }
            "BITCOUNT" => {
                need_min(cmd, args, 1)?;
                let start = args.get(1).map(|a| parse_i64(a)).transpose()?;
                let end = args.get(2).map(|a| parse_i64(a)).transpose()?;
                Ok(Reply::Int(self.bitcount(&args[0], start, end)?))
            }
            "BITPOS" => {
                need_min(cmd, args, 2)?;
                let bit = match args[1].as_str() {
                    "0" => false,
                    "1" => true,
                    _ => return Err(CacheError::other("bit is not an integer or out of range")),
                };
                let mut rest: Vec<&String> = args[2..].iter().collect();
                let reverse = rest
                    .last()
                    .map(|a| a.eq_ignore_ascii_case("REV"))
                    .unwrap_or(false);
                if reverse {
                    rest.pop();
                }
                let start = rest.first().map(|a| parse_i64(a)).transpose()?;
                let end = rest.get(1).map(|a| parse_i64(a)).transpose()?;
                Ok(Reply::Int(self.bitpos(&args[0], bit, start, end, reverse)?))
            }
            "BITOP" => {
                need_min(cmd, args, 3)?;
                let op = match args[0].to_ascii_uppercase().as_str() {
                    "AND" => BitOp::And,
                    "OR" => BitOp::Or,
                    "XOR" => BitOp::Xor,
                    "NOT" => BitOp::Not,
                    _ => return Err(CacheError::Syntax),
                };
                Ok(Reply::Int(self.bitop(op, &args[1], &args[2..])?))
            }
            "BITFIELD" => {
                need_min(cmd, args, 1)?;
                let cmds = parse_bitfield(&args[1..])?;
                let replies = self.bitfield(&args[0], &cmds)?;
                Ok(Reply::Array(
                    replies
                        .into_iter()
                        .map(|slot| slot.map(Reply::Int).unwrap_or(Reply::Null))
                        .collect(),
                ))
            }
            "BITFIELD_RO" => {
                need_min(cmd, args, 1)?;
                let mut specs = Vec::new();
                let mut rest = &args[1..];
                while !rest.is_empty() {
                    if !rest[0].eq_ignore_ascii_case("GET") || rest.len() < 3 {
                        return Err(CacheError::Syntax);
                    }
                    specs.push(FieldSpec::parse(&rest[1], &rest[2])?);
                    rest = &rest[3..];
                }
                let replies = self.bitfield_ro(&args[0], &specs)?;
                Ok(Reply::Array(
                    replies
                        .into_iter()
                        .map(|slot| slot.map(Reply::Int).unwrap_or(Reply::Null))
                        .collect(),
                ))
            }

            // ---- json -------------------------------------------------
            "JSON.SET" => {
                need(cmd, args, 3)?;
                self.json_set(&args[0], &args[1], &args[2])?;
                Ok(Reply::ok())
            }
            "JSON.GET" => {
                need_min(cmd, args, 1)?;
                Ok(opt_bulk(self.json_get(&args[0], &args[1..])?))
            }
            "JSON.DEL" => {
                need_min(cmd, args, 1)?;
                let path = args.get(1).map(|p| p.as_str()).unwrap_or("$");
                Ok(Reply::Int(self.json_del(&args[0], path)?))
            }
            "JSON.TYPE" => {
                need_min(cmd, args, 1)?;
                let path = args.get(1).map(|p| p.as_str()).unwrap_or("$");
                Ok(opt_bulk(self.json_type(&args[0], path)?.map(String::from)))
            }
            "JSON.ARRAPPEND" => {
                need_min(cmd, args, 3)?;
                Ok(Reply::Int(self.json_arrappend(&args[0], &args[1], &args[2..])?))
            }
            "JSON.ARRINSERT" => {
                need_min(cmd, args, 4)?;
                Ok(Reply::Int(self.json_arrinsert(
                    &args[0],
                    &args[1],
                    parse_i64(&args[2])?,
                    &args[3..],
                )?))
            }
            "JSON.ARRLEN" => {
                need_min(cmd, args, 1)?;
                let path = args.get(1).map(|p| p.as_str()).unwrap_or("$");
                Ok(match self.json_arrlen(&args[0], path)? {
                    Some(len) => Reply::Int(len),
                    None => Reply::Null,
                })
            }
            "JSON.ARRTRIM" => {
                need(cmd, args, 4)?;
                Ok(Reply::Int(self.json_arrtrim(
                    &args[0],
                    &args[1],
                    parse_i64(&args[2])?,
                    parse_i64(&args[3])?,
                )?))
            }
            "JSON.ARRPOP" => {
                need_min(cmd, args, 1)?;
                let path = args.get(1).map(|p| p.as_str()).unwrap_or("$");
                let index = args.get(2).map(|i| parse_i64(i)).transpose()?.unwrap_or(-1);
                Ok(opt_bulk(self.json_arrpop(&args[0], path, index)?))
            }
            "JSON.STRAPPEND" => {
                need(cmd, args, 3)?;
                Ok(Reply::Int(self.json_strappend(&args[0], &args[1], &args[2])?))
            }
            "JSON.STRLEN" => {
                need_min(cmd, args, 1)?;
                let path = args.get(1).map(|p| p.as_str()).unwrap_or("$");
                Ok(match self.json_strlen(&args[0], path)? {
                    Some(len) => Reply::Int(len),
                    None => Reply::Null,
                })
            }
            "JSON.NUMINCRBY" => {
                need(cmd, args, 3)?;
                let next = self.json_numincrby(&args[0], &args[1], parse_f64(&args[2])?)?;
                Ok(Reply::bulk(format_float(next)))
            }
            "JSON.NUMMULTBY" => {
                need(cmd, args, 3)?;
                let next = self.json_nummultby(&args[0], &args[1], parse_f64(&args[2])?)?;
                Ok(Reply::bulk(format_float(next)))
            }

            // ---- geo --------------------------------------------------
            "GEOADD" => {
                need_min(cmd, args, 4)?;
                if args[1..].len() % 3 != 0 {
                    return Err(CacheError::Syntax);
                }
                let mut items = Vec::with_capacity(args[1..].len() / 3);
                for triple in args[1..].chunks(3) {
                    items.push((
                        parse_f64(&triple[0])?,
                        parse_f64(&triple[1])?,
                        triple[2].clone(),
                    ));
                }
                Ok(Reply::Int(self.geoadd(&args[0], &items)?))
            }
            "GEODIST" => {
                need_min(cmd, args, 3)?;
                let unit = args
                    .get(3)
                    .map(|u| GeoUnit::parse(u))
                    .transpose()?
                    .unwrap_or(GeoUnit::Meters);
                Ok(match self.geodist(&args[0], &args[1], &args[2], unit)? {
                    Some(dist) => Reply::bulk(format!("{:.4}", dist)),
                    None => Reply::Null,
                })
            }
            "GEOPOS" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.geopos(&args[0], &args[1..])?
                        .into_iter()
                        .map(|point| match point {
                            Some(p) => coords_reply(p),
                            None => Reply::NullArray,
                        })
                        .collect(),
                ))
            }
            "GEOHASH" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.geohash(&args[0], &args[1..])?
                        .into_iter()
                        .map(opt_bulk)
                        .collect(),
                ))
            }
            "GEORADIUS" => {
                need_min(cmd, args, 5)?;
                let from = GeoFrom::LonLat(parse_f64(&args[1])?, parse_f64(&args[2])?);
                let unit = GeoUnit::parse(&args[4])?;
                let by = GeoBy::Radius(parse_f64(&args[3])? * unit.meters());
                let opts = geo_output_options(&args[5..])?;
                let hits = self.geosearch(&args[0], &from, by, opts.sort, opts.count)?;
                Ok(geo_hits_reply(hits, &opts, unit))
            }
            "GEOSEARCH" => {
                need_min(cmd, args, 4)?;
                let (from, by, rest, unit) = geo_search_area(&args[1..])?;
                let opts = geo_output_options(rest)?;
                let hits = self.geosearch(&args[0], &from, by, opts.sort, opts.count)?;
                Ok(geo_hits_reply(hits, &opts, unit))
            }
            "GEOSEARCHSTORE" => {
                need_min(cmd, args, 5)?;
                let (from, by, rest, _) = geo_search_area(&args[2..])?;
                let opts = geo_output_options(rest)?;
                Ok(Reply::Int(self.geosearchstore(
                    &args[0], &args[1], &from, by, opts.sort, opts.count,
                )?))
            }

            // ---- hyperloglog ------------------------------------------
            "PFADD" => {
                need_min(cmd, args, 1)?;
                Ok(Reply::Int(i64::from(self.pfadd(&args[0], &args[1..])?)))
            }
            "PFCOUNT" => {
                need_min(cmd, args, 1)?;
                Ok(Reply::Int(self.pfcount(args)? as i64))
            }
            "PFMERGE" => {
                need_min(cmd, args, 1)?;
                self.pfmerge(&args[0], &args[1..])?;
                Ok(Reply::ok())
            }

            // ---- bloom ------------------------------------------------
            "BF.RESERVE" => {
                need(cmd, args, 3)?;
                self.bf_reserve(&args[0], parse_f64(&args[1])?, parse_u64(&args[2])?)?;
                Ok(Reply::ok())
            }
            "BF.ADD" => {
                need(cmd, args, 2)?;
                let added = self.bf_add(&args[0], &args[1..2])?;
                Ok(Reply::Int(i64::from(added[0])))
            }
            "BF.MADD" => {
                need_min(cmd, args, 2)?;
                Ok(bool_array(self.bf_add(&args[0], &args[1..])?))
            }
            "BF.EXISTS" => {
                need(cmd, args, 2)?;
                let found = self.bf_exists(&args[0], &args[1..2])?;
                Ok(Reply::Int(i64::from(found[0])))
            }
            "BF.MEXISTS" => {
                need_min(cmd, args, 2)?;
                Ok(bool_array(self.bf_exists(&args[0], &args[1..])?))
            }
            "BF.CARD" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.bf_card(&args[0])? as i64))
            }
            "BF.INFO" => {
                need(cmd, args, 1)?;
                let (capacity, rate, bits, hashes, inserted) = self.bf_info(&args[0])?;
                Ok(info_pairs(vec![
                    ("Capacity", Reply::Int(capacity as i64)),
                    ("Error rate", Reply::bulk(format_float(rate))),
                    ("Size", Reply::Int(bits as i64)),
                    ("Number of hash functions", Reply::Int(hashes as i64)),
                    ("Number of items inserted", Reply::Int(inserted as i64)),
                ]))
            }
            "BF.SCANDUMP" => {
                need(cmd, args, 2)?;
                let (next, chunk) = self.bf_scandump(&args[0], parse_u64(&args[1])?)?;
                Ok(Reply::Array(vec![
                    Reply::Int(next as i64),
                    Reply::bulk(hex_encode(&chunk)),
                ]))
            }
            "BF.LOADCHUNK" => {
                need(cmd, args, 3)?;
                self.bf_loadchunk(&args[0], parse_u64(&args[1])?, &hex_decode(&args[2])?)?;
                Ok(Reply::ok())
            }

            // ---- cuckoo -----------------------------------------------
            "CF.RESERVE" => {
                need(cmd, args, 2)?;
                self.cf_reserve(&args[0], parse_u64(&args[1])?)?;
                Ok(Reply::ok())
            }
            "CF.ADD" => {
                need(cmd, args, 2)?;
                self.cf_add(&args[0], &args[1])?;
                Ok(Reply::Int(1))
            }
            "CF.ADDNX" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.cf_add_nx(&args[0], &args[1])?)))
            }
            "CF.DEL" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.cf_del(&args[0], &args[1])?)))
            }
            "CF.COUNT" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(self.cf_count(&args[0], &args[1])? as i64))
            }
            "CF.EXISTS" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.cf_exists(&args[0], &args[1])?)))
            }
            "CF.INFO" => {
                need(cmd, args, 1)?;
                let (buckets, items) = self.cf_info(&args[0])?;
                Ok(info_pairs(vec![
                    ("Number of buckets", Reply::Int(buckets as i64)),
                    ("Number of items inserted", Reply::Int(items as i64)),
                ]))
            }
            "CF.SCANDUMP" => {
                need(cmd, args, 2)?;
                let (next, chunk) = self.cf_scandump(&args[0], parse_u64(&args[1])?)?;
                Ok(Reply::Array(vec![
                    Reply::Int(next as i64),
                    Reply::bulk(hex_encode(&chunk)),
                ]))
            }
            "CF.LOADCHUNK" => {
                need(cmd, args, 3)?;
                self.cf_loadchunk(&args[0], parse_u64(&args[1])?, &hex_decode(&args[2])?)?;
                Ok(Reply::ok())
            }

            // ---- count-min sketch -------------------------------------
            "CMS.INITBYDIM" => {
                need(cmd, args, 3)?;
                self.cms_init_by_dim(
                    &args[0],
                    parse_u64(&args[1])? as usize,
                    parse_u64(&args[2])? as usize,
                )?;
                Ok(Reply::ok())
            }
            "CMS.INITBYPROB" => {
                need(cmd, args, 3)?;
                self.cms_init_by_prob(&args[0], parse_f64(&args[1])?, parse_f64(&args[2])?)?;
                Ok(Reply::ok())
            }
            "CMS.INCRBY" => {
                need_min(cmd, args, 3)?;
                if args[1..].len() % 2 != 0 {
                    return Err(CacheError::WrongArity("cms.incrby".to_string()));
                }
                let mut items = Vec::with_capacity(args[1..].len() / 2);
                for pair in args[1..].chunks(2) {
                    items.push((pair[0].clone(), parse_u64(&pair[1])?));
                }
                Ok(Reply::Array(
                    self.cms_incrby(&args[0], &items)?
                        .into_iter()
                        .map(|e| Reply::Int(e as i64))
                        .collect(),
                ))
            }
            "CMS.QUERY" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.cms_query(&args[0], &args[1..])?
                        .into_iter()
                        .map(|e| Reply::Int(e as i64))
                        .collect(),
                ))
            }
            "CMS.MERGE" => {
                need_min(cmd, args, 3)?;
                let numkeys = parse_u64(&args[1])? as usize;
                let sources: Vec<String> = args
                    .get(2..2 + numkeys)
                    .ok_or(CacheError::Syntax)?
                    .to_vec();
                let weights = match args.get(2 + numkeys) {
                    None => None,
                    Some(word) if word.eq_ignore_ascii_case("WEIGHTS") => {
                        let parsed: CacheResult<Vec<u64>> =
                            args[3 + numkeys..].iter().map(|w| parse_u64(w)).collect();
                        Some(parsed?)
                    }
                    Some(_) => return Err(CacheError::Syntax),
                };
                self.cms_merge(&args[0], &sources, weights.as_deref())?;
                Ok(Reply::ok())
            }
            "CMS.INFO" => {
                need(cmd, args, 1)?;
                let (width, depth, total) = self.cms_info(&args[0])?;
                Ok(info_pairs(vec![
                    ("width", Reply::Int(width as i64)),
                    ("depth", Reply::Int(depth as i64)),
                    ("count", Reply::Int(total as i64)),
                ]))
            }

            // ---- t-digest ---------------------------------------------
            "TDIGEST.CREATE" => {
                need_min(cmd, args, 1)?;
                let compression = match args.get(1) {
                    Some(word) if word.eq_ignore_ascii_case("COMPRESSION") => {
                        Some(parse_f64(args.get(2).ok_or(CacheError::Syntax)?)?)
                    }
                    Some(_) => return Err(CacheError::Syntax),
                    None => None,
                };
                self.tdigest_create(&args[0], compression)?;
                Ok(Reply::ok())
            }
            "TDIGEST.ADD" => {
                need_min(cmd, args, 2)?;
                let values: CacheResult<Vec<f64>> =
                    args[1..].iter().map(|v| parse_f64(v)).collect();
                self.tdigest_add(&args[0], &values?)?;
                Ok(Reply::ok())
            }
            "TDIGEST.MERGE" => {
                need_min(cmd, args, 3)?;
                let numkeys = parse_u64(&args[1])? as usize;
                let sources: Vec<String> = args
                    .get(2..2 + numkeys)
                    .ok_or(CacheError::Syntax)?
                    .to_vec();
                self.tdigest_merge(&args[0], &sources)?;
                Ok(Reply::ok())
            }
            "TDIGEST.QUANTILE" => {
                need_min(cmd, args, 2)?;
                let quantiles: CacheResult<Vec<f64>> =
                    args[1..].iter().map(|q| parse_f64(q)).collect();
                Ok(float_array(self.tdigest_quantile(&args[0], &quantiles?)?))
            }
            "TDIGEST.CDF" => {
                need_min(cmd, args, 2)?;
                let values: CacheResult<Vec<f64>> =
                    args[1..].iter().map(|v| parse_f64(v)).collect();
                Ok(float_array(self.tdigest_cdf(&args[0], &values?)?))
            }
            "TDIGEST.MIN" => {
                need(cmd, args, 1)?;
                Ok(Reply::bulk(nan_or(self.tdigest_min(&args[0])?)))
            }
            "TDIGEST.MAX" => {
                need(cmd, args, 1)?;
                Ok(Reply::bulk(nan_or(self.tdigest_max(&args[0])?)))
            }
            "TDIGEST.TRIMMED_MEAN" => {
                need(cmd, args, 3)?;
                let mean =
                    self.tdigest_trimmed_mean(&args[0], parse_f64(&args[1])?, parse_f64(&args[2])?)?;
                Ok(Reply::bulk(nan_or(mean)))
            }
            "TDIGEST.RESET" => {
                need(cmd, args, 1)?;
                self.tdigest_reset(&args[0])?;
                Ok(Reply::ok())
            }
            "TDIGEST.INFO" => {
                need(cmd, args, 1)?;
                let (compression, centroids, observations) = self.tdigest_info(&args[0])?;
                Ok(info_pairs(vec![
                    ("Compression", Reply::Int(compression as i64)),
                    ("Centroids", Reply::Int(centroids as i64)),
                    ("Observations", Reply::Int(observations as i64)),
                ]))
            }

            // ---- top-k ------------------------------------------------
            "TOPK.RESERVE" => {
                need_min(cmd, args, 2)?;
                let k = parse_u64(&args[1])? as usize;
                let (width, depth, decay) = match args.len() {
                    2 => ((8 * k).max(64), 4, 0.9),
                    5 => (
                        parse_u64(&args[2])? as usize,
                        parse_u64(&args[3])? as usize,
                        parse_f64(&args[4])?,
                    ),
                    _ => return Err(CacheError::Syntax),
                };
                self.topk_reserve(&args[0], k, width, depth, decay)?;
                Ok(Reply::ok())
            }
            "TOPK.ADD" => {
                need_min(cmd, args, 2)?;
                Ok(bool_array(self.topk_add(&args[0], &args[1..])?))
            }
            "TOPK.INCRBY" => {
                need_min(cmd, args, 3)?;
                if args[1..].len() % 2 != 0 {
                    return Err(CacheError::WrongArity("topk.incrby".to_string()));
                }
                let mut items = Vec::with_capacity(args[1..].len() / 2);
                for pair in args[1..].chunks(2) {
                    items.push((pair[0].clone(), parse_u64(&pair[1])?));
                }
                Ok(bool_array(self.topk_incrby(&args[0], &items)?))
            }
            "TOPK.QUERY" => {
                need_min(cmd, args, 2)?;
                Ok(bool_array(self.topk_query(&args[0], &args[1..])?))
            }
            "TOPK.COUNT" => {
                need_min(cmd, args, 2)?;
                Ok(Reply::Array(
                    self.topk_count(&args[0], &args[1..])?
                        .into_iter()
                        .map(|c| Reply::Int(c as i64))
                        .collect(),
                ))
            }
            "TOPK.LIST" => {
                need(cmd, args, 1)?;
                let mut flat = Vec::new();
                for (item, count) in self.topk_list(&args[0])? {
                    flat.push(Reply::bulk(item));
                    flat.push(Reply::Int(count as i64));
                }
                Ok(Reply::Array(flat))
            }
            "TOPK.INFO" => {
                need(cmd, args, 1)?;
                let (k, width, depth, decay) = self.topk_info(&args[0])?;
                Ok(info_pairs(vec![
                    ("k", Reply::Int(k as i64)),
                    ("width", Reply::Int(width as i64)),
                    ("depth", Reply::Int(depth as i64)),
                    ("decay", Reply::bulk(format_float(decay))),
                ]))
            }

            // ---- suggestions ------------------------------------------
            "FT.SUGADD" => {
                need_min(cmd, args, 3)?;
                let payload = match args.get(3) {
                    Some(word) if word.eq_ignore_ascii_case("PAYLOAD") => {
                        Some(args.get(4).ok_or(CacheError::Syntax)?.clone())
                    }
                    Some(_) => return Err(CacheError::Syntax),
                    None => None,
                };
                Ok(Reply::Int(self.sug_add(
                    &args[0],
                    &args[1],
                    parse_f64(&args[2])?,
                    payload,
                )?))
            }
            "FT.SUGDEL" => {
                need(cmd, args, 2)?;
                Ok(Reply::Int(i64::from(self.sug_del(&args[0], &args[1])?)))
            }
            "FT.SUGGET" => {
                need_min(cmd, args, 2)?;
                let mut fuzzy = false;
                let mut max = 5usize;
                let mut withscores = false;
                let mut withpayloads = false;
                let mut rest = args[2..].iter();
                while let Some(word) = rest.next() {
                    match word.to_ascii_uppercase().as_str() {
                        "FUZZY" => fuzzy = true,
                        "WITHSCORES" => withscores = true,
                        "WITHPAYLOADS" => withpayloads = true,
                        "MAX" => {
                            max = parse_u64(rest.next().ok_or(CacheError::Syntax)?)? as usize
                        }
                        _ => return Err(CacheError::Syntax),
                    }
                }

                let hits = self.sug_get(&args[0], &args[1], fuzzy, max)?;
                let mut flat = Vec::new();
                for hit in hits {
                    flat.push(Reply::bulk(hit.text));
                    if withscores {
                        flat.push(Reply::bulk(format_float(hit.score)));
                    }
                    if withpayloads {
                        flat.push(hit.payload.map(Reply::Bulk).unwrap_or(Reply::Null));
                    }
                }
                Ok(Reply::Array(flat))
            }
            "FT.SUGLEN" => {
                need(cmd, args, 1)?;
                Ok(Reply::Int(self.sug_len(&args[0])?))
            }

            _ => Err(CacheError::UnknownCommand(cmd.to_lowercase())),
        }
    }

    fn set_command(&self, args: &[String]) -> CacheResult<Reply> {
        need_min("SET", args, 2)?;
        let mut ttl: Option<Duration> = None;
        let mut nx = false;
        let mut xx = false;

        let mut rest = args[2..].iter();
        while let Some(word) = rest.next() {
            match word.to_ascii_uppercase().as_str() {
                "EX" => {
                    let secs = parse_u64(rest.next().ok_or(CacheError::Syntax)?)?;
                    ttl = Some(Duration::from_secs(secs));
                }
                "PX" => {
                    let ms = parse_u64(rest.next().ok_or(CacheError::Syntax)?)?;
                    ttl = Some(Duration::from_millis(ms));
                }
                "NX" => nx = true,
                "XX" => xx = true,
                _ => return Err(CacheError::Syntax),
            }
        }
        if nx && xx {
            return Err(CacheError::Syntax);
        }

        let exists = self.type_of(&args[0]).is_some();
        if (nx && exists) || (xx && !exists) {
            return Ok(Reply::Null);
        }

        match ttl {
            Some(ttl) => self.set_ex(&args[0], args[1].clone(), ttl)?,
            None => self.set(&args[0], args[1].clone())?,
        }
        Ok(Reply::ok())
    }

    fn memory_command(&self, args: &[String]) -> CacheResult<Reply> {
        match args.first().map(|a| a.to_ascii_uppercase()) {
            Some(sub) if sub == "USAGE" => {
                let key = args.get(1).ok_or(CacheError::Syntax)?;
                Ok(match self.memory_usage(key) {
                    Some(bytes) => Reply::Int(bytes as i64),
                    None => Reply::Null,
                })
            }
            Some(sub) if sub == "STATS" => {
                let report = self.memory_report();
                let mut flat = vec![
                    Reply::bulk("total.logical-bytes"),
                    Reply::Int(report.logical_bytes as i64),
                    Reply::bulk("total.rss-bytes"),
                    Reply::Int(report.rss_bytes as i64),
                    Reply::bulk("fragmentation.ratio"),
                    Reply::bulk(format!("{:.2}", report.fragmentation)),
                    Reply::bulk("keys.expired"),
                    Reply::Int(report.expired_keys as i64),
                    Reply::bulk("keys.evicted"),
                    Reply::Int(report.evicted_keys as i64),
                    Reply::bulk("defrag.runs"),
                    Reply::Int(report.defrag_runs as i64),
                ];
                for (kind, bytes) in &report.per_kind {
                    flat.push(Reply::bulk(format!("kind.{}", kind)));
                    flat.push(Reply::Int(*bytes as i64));
                }
                Ok(Reply::Array(flat))
            }
            _ => Err(CacheError::Syntax),
        }
    }

    fn xgroup_command(&self, args: &[String]) -> CacheResult<Reply> {
        let sub = args
            .first()
            .map(|a| a.to_ascii_uppercase())
            .ok_or(CacheError::Syntax)?;
        match sub.as_str() {
            "CREATE" => {
                need_min("XGROUP CREATE", &args[1..], 3)?;
                let mkstream = args
                    .get(4)
                    .map(|a| a.eq_ignore_ascii_case("MKSTREAM"))
                    .unwrap_or(false);
                self.xgroup_create(&args[1], &args[2], &args[3], mkstream)?;
                Ok(Reply::ok())
            }
            "CREATECONSUMER" => {
                need_min("XGROUP CREATECONSUMER", &args[1..], 3)?;
                let created = self.xgroup_create_consumer(&args[1], &args[2], &args[3])?;
                Ok(Reply::Int(i64::from(created)))
            }
            "DELCONSUMER" => {
                need_min("XGROUP DELCONSUMER", &args[1..], 3)?;
                Ok(Reply::Int(self.xgroup_del_consumer(&args[1], &args[2], &args[3])?))
            }
            "DESTROY" => {
                need_min("XGROUP DESTROY", &args[1..], 2)?;
                Ok(Reply::Int(i64::from(self.xgroup_destroy(&args[1], &args[2])?)))
            }
            "SETID" => {
                need_min("XGROUP SETID", &args[1..], 3)?;
                self.xgroup_setid(&args[1], &args[2], &args[3])?;
                Ok(Reply::ok())
            }
            _ => Err(CacheError::Syntax),
        }
    }

    fn xinfo_command(&self, args: &[String]) -> CacheResult<Reply> {
        let sub = args
            .first()
            .map(|a| a.to_ascii_uppercase())
            .ok_or(CacheError::Syntax)?;
        match sub.as_str() {
            "STREAM" => {
                let key = args.get(1).ok_or(CacheError::Syntax)?;
                let (length, last_id, groups, first, last) = self.xinfo_stream(key)?;
                Ok(info_pairs(vec![
                    ("length", Reply::Int(length)),
                    ("last-generated-id", Reply::bulk(last_id.to_string())),
                    ("groups", Reply::Int(groups)),
                    (
                        "first-entry",
                        first.map(entry_reply).unwrap_or(Reply::NullArray),
                    ),
                    (
                        "last-entry",
                        last.map(entry_reply).unwrap_or(Reply::NullArray),
                    ),
                ]))
            }
            "GROUPS" => {
                let key = args.get(1).ok_or(CacheError::Syntax)?;
                Ok(Reply::Array(
                    self.xinfo_groups(key)?
                        .into_iter()
                        .map(|(name, consumers, pending, last)| {
                            info_pairs(vec![
                                ("name", Reply::bulk(name)),
                                ("consumers", Reply::Int(consumers)),
                                ("pending", Reply::Int(pending)),
                                ("last-delivered-id", Reply::bulk(last.to_string())),
                            ])
                        })
                        .collect(),
                ))
            }
            "CONSUMERS" => {
                let key = args.get(1).ok_or(CacheError::Syntax)?;
                let group = args.get(2).ok_or(CacheError::Syntax)?;
                Ok(Reply::Array(
                    self.xinfo_consumers(key, group)?
                        .into_iter()
                        .map(|(name, pending)| {
                            info_pairs(vec![
                                ("name", Reply::bulk(name)),
                                ("pending", Reply::Int(pending)),
                            ])
                        })
                        .collect(),
                ))
            }
            _ => Err(CacheError::Syntax),
        }
    }

    fn info_text(&self) -> String {
        use crate::db::StatField;
        let report = self.memory_report();
        format!(
            "# Server\r\nengine:crystalcache\r\n\r\n# Keyspace\r\nkeys:{}\r\n\r\n\
             # Stats\r\ntotal_commands_processed:{}\r\nexpired_keys:{}\r\n\
             evicted_keys:{}\r\ndefrag_runs:{}\r\nexec_aborts:{}\r\n\r\n\
             # Memory\r\nused_memory:{}\r\nused_memory_rss:{}\r\nmem_fragmentation_ratio:{:.2}\r\n",
            self.dbsize(),
            self.stat(StatField::Commands),
            self.stat(StatField::ExpiredKeys),
            self.stat(StatField::EvictedKeys),
            self.stat(StatField::DefragRuns),
            self.stat(StatField::ExecAborts),
            report.logical_bytes,
            report.rss_bytes,
            report.fragmentation,
        )
    }
}

// ---- shared argument helpers ------------------------------------------

fn need(cmd: &str, args: &[String], exact: usize) -> CacheResult<()> {
    if args.len() != exact {
        return Err(CacheError::WrongArity(cmd.to_lowercase()));
    }
    Ok(())
}

fn need_min(cmd: &str, args: &[String], min: usize) -> CacheResult<()> {
    if args.len() < min {
        return Err(CacheError::WrongArity(cmd.to_lowercase()));
    }
    Ok(())
}

fn parse_i64(text: &str) -> CacheResult<i64> {
    text.parse().map_err(|_| CacheError::NotInteger)
}

fn parse_u64(text: &str) -> CacheResult<u64> {
    text.parse().map_err(|_| CacheError::NotInteger)
}

fn parse_f64(text: &str) -> CacheResult<f64> {
    text.parse().map_err(|_| CacheError::NotFloat)
}

fn parse_score(text: &str) -> CacheResult<f64> {
    match text {
        "+inf" | "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => {
            let score: f64 = text.parse().map_err(|_| CacheError::NanScore)?;
            if score.is_nan() {
                Err(CacheError::NanScore)
            } else {
                Ok(score)
            }
        }
    }
}

fn parse_ids(args: &[String]) -> CacheResult<Vec<StreamId>> {
    args.iter().map(|id| StreamId::parse(id, 0)).collect()
}

fn expire_mode(flag: Option<&String>) -> CacheResult<ExpireMode> {
    match flag.map(|f| f.to_ascii_uppercase()) {
        None => Ok(ExpireMode::Always),
        Some(word) => match word.as_str() {
            "NX" => Ok(ExpireMode::Nx),
            "XX" => Ok(ExpireMode::Xx),
            "GT" => Ok(ExpireMode::Gt),
            "LT" => Ok(ExpireMode::Lt),
            _ => Err(CacheError::Syntax),
        },
    }
}

/// Parses trailing `[MATCH pattern] [COUNT n]` options.
fn scan_options(args: &[String]) -> CacheResult<(Option<String>, usize)> {
    let mut pattern = None;
    let mut count = 10usize;
    let mut rest = args.iter();
    while let Some(word) = rest.next() {
        match word.to_ascii_uppercase().as_str() {
            "MATCH" => pattern = Some(rest.next().ok_or(CacheError::Syntax)?.clone()),
            "COUNT" => count = parse_u64(rest.next().ok_or(CacheError::Syntax)?)? as usize,
            _ => return Err(CacheError::Syntax),
        }
    }
    Ok((pattern, count))
}

/// `numkeys key... [LIMIT n]` shape shared by SINTERCARD/ZINTERCARD.
fn numkeys_with_limit(cmd: &str, args: &[String]) -> CacheResult<(Vec<String>, usize)> {
    let numkeys = parse_u64(&args[0])? as usize;
    let keys: Vec<String> = args
        .get(1..1 + numkeys)
        .ok_or_else(|| CacheError::WrongArity(cmd.to_lowercase()))?
        .to_vec();
    let limit = match args.get(1 + numkeys) {
        None => 0,
        Some(word) if word.eq_ignore_ascii_case("LIMIT") => {
            parse_u64(args.get(2 + numkeys).ok_or(CacheError::Syntax)?)? as usize
        }
        Some(_) => return Err(CacheError::Syntax),
    };
    Ok((keys, limit))
}

/// `[dest] numkeys key... [WEIGHTS w...] [WITHSCORES]` shape shared by the
/// zset combine commands. `skip` is the number of leading non-numkeys args.
fn combine_args(
    cmd: &str,
    args: &[String],
    skip: usize,
) -> CacheResult<(Vec<String>, Option<Vec<f64>>, bool)> {
    let numkeys = parse_u64(args.get(skip).ok_or_else(|| {
        CacheError::WrongArity(cmd.to_lowercase())
    })?)? as usize;
    let keys_start = skip + 1;
    let keys: Vec<String> = args
        .get(keys_start..keys_start + numkeys)
        .ok_or_else(|| CacheError::WrongArity(cmd.to_lowercase()))?
        .to_vec();

    let mut weights = None;
    let mut withscores = false;
    let mut idx = keys_start + numkeys;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "WEIGHTS" => {
                let parsed: CacheResult<Vec<f64>> = args
                    .get(idx + 1..idx + 1 + numkeys)
                    .ok_or(CacheError::Syntax)?
                    .iter()
                    .map(|w| parse_f64(w))
                    .collect();
                weights = Some(parsed?);
                idx += 1 + numkeys;
            }
            "WITHSCORES" => {
                withscores = true;
                idx += 1;
            }
            _ => return Err(CacheError::Syntax),
        }
    }
    Ok((keys, weights, withscores))
}

fn trailing_count(args: &[String]) -> CacheResult<Option<usize>> {
    match args.first() {
        None => Ok(None),
        Some(word) if word.eq_ignore_ascii_case("COUNT") => {
            let n = parse_u64(args.get(1).ok_or(CacheError::Syntax)?)?;
            Ok(Some(n as usize))
        }
        Some(_) => Err(CacheError::Syntax),
    }
}

/// `[COUNT n] STREAMS key... id...` shape for XREAD/XREADGROUP.
fn xread_args(args: &[String]) -> CacheResult<(Option<usize>, Vec<(String, String)>)> {
    let mut idx = 0;
    let mut count = None;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "COUNT" => {
                count = Some(parse_u64(args.get(idx + 1).ok_or(CacheError::Syntax)?)? as usize);
                idx += 2;
            }
            "STREAMS" => {
                let rest = &args[idx + 1..];
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return Err(CacheError::Syntax);
                }
                let half = rest.len() / 2;
                let streams = rest[..half]
                    .iter()
                    .zip(&rest[half..])
                    .map(|(key, id)| (key.clone(), id.clone()))
                    .collect();
                return Ok((count, streams));
            }
            _ => return Err(CacheError::Syntax),
        }
    }
    Err(CacheError::Syntax)
}

fn flag_present(args: &[String], flag: &str) -> CacheResult<bool> {
    match args.first() {
        None => Ok(false),
        Some(word) if word.eq_ignore_ascii_case(flag) => Ok(true),
        Some(_) => Err(CacheError::Syntax),
    }
}

// ---- geo option parsing -----------------------------------------------

struct GeoOutputOptions {
    withcoord: bool,
    withdist: bool,
    withhash: bool,
    count: Option<usize>,
    sort: Option<GeoSort>,
}

fn geo_output_options(args: &[String]) -> CacheResult<GeoOutputOptions> {
    let mut opts = GeoOutputOptions {
        withcoord: false,
        withdist: false,
        withhash: false,
        count: None,
        sort: None,
    };
    let mut rest = args.iter();
    while let Some(word) = rest.next() {
        match word.to_ascii_uppercase().as_str() {
            "WITHCOORD" => opts.withcoord = true,
            "WITHDIST" => opts.withdist = true,
            "WITHHASH" => opts.withhash = true,
            "ASC" => opts.sort = Some(GeoSort::Asc),
            "DESC" => opts.sort = Some(GeoSort::Desc),
            "COUNT" => {
                opts.count = Some(parse_u64(rest.next().ok_or(CacheError::Syntax)?)? as usize)
            }
            _ => return Err(CacheError::Syntax),
        }
    }
    Ok(opts)
}

/// `FROMMEMBER m | FROMLONLAT lon lat` plus `BYRADIUS r unit | BYBOX w h
/// unit`; returns the remaining args for output-option parsing.
fn geo_search_area(args: &[String]) -> CacheResult<(GeoFrom, GeoBy, &[String], GeoUnit)> {
    let mut idx = 0;
    let from = match args
        .get(idx)
        .map(|a| a.to_ascii_uppercase())
        .ok_or(CacheError::Syntax)?
        .as_str()
    {
        "FROMMEMBER" => {
            let member = args.get(idx + 1).ok_or(CacheError::Syntax)?.clone();
            idx += 2;
            GeoFrom::Member(member)
        }
        "FROMLONLAT" => {
            let lon = parse_f64(args.get(idx + 1).ok_or(CacheError::Syntax)?)?;
            let lat = parse_f64(args.get(idx + 2).ok_or(CacheError::Syntax)?)?;
            idx += 3;
            GeoFrom::LonLat(lon, lat)
        }
        _ => return Err(CacheError::Syntax),
    };

    let (by, unit) = match args
        .get(idx)
        .map(|a| a.to_ascii_uppercase())
        .ok_or(CacheError::Syntax)?
        .as_str()
    {
        "BYRADIUS" => {
            let radius = parse_f64(args.get(idx + 1).ok_or(CacheError::Syntax)?)?;
            let unit = GeoUnit::parse(args.get(idx + 2).ok_or(CacheError::Syntax)?)?;
            idx += 3;
            (GeoBy::Radius(radius * unit.meters()), unit)
        }
        "BYBOX" => {
            let width = parse_f64(args.get(idx + 1).ok_or(CacheError::Syntax)?)?;
            let height = parse_f64(args.get(idx + 2).ok_or(CacheError::Syntax)?)?;
            let unit = GeoUnit::parse(args.get(idx + 3).ok_or(CacheError::Syntax)?)?;
            idx += 4;
            (
                GeoBy::Box {
                    width: width * unit.meters(),
                    height: height * unit.meters(),
                },
                unit,
            )
        }
        _ => return Err(CacheError::Syntax),
    };
    Ok((from, by, &args[idx..], unit))
}

fn geo_hits_reply(
    hits: Vec<crate::engines::geo::GeoHit>,
    opts: &GeoOutputOptions,
    unit: GeoUnit,
) -> Reply {
    if !opts.withcoord && !opts.withdist && !opts.withhash {
        return Reply::Array(hits.into_iter().map(|h| Reply::bulk(h.member)).collect());
    }
    Reply::Array(
        hits.into_iter()
            .map(|hit| {
                let mut row = vec![Reply::bulk(hit.member)];
                if opts.withdist {
                    row.push(Reply::bulk(format!("{:.4}", hit.dist_m / unit.meters())));
                }
                if opts.withhash {
                    row.push(Reply::Int(0));
                }
                if opts.withcoord {
                    row.push(coords_reply(hit.point));
                }
                Reply::Array(row)
            })
            .collect(),
    )
}

fn coords_reply(point: GeoPoint) -> Reply {
    Reply::Array(vec![
        Reply::bulk(format!("{:.17}", point.lon)),
        Reply::bulk(format!("{:.17}", point.lat)),
    ])
}

// ---- reply shaping ----------------------------------------------------

fn opt_bulk(value: Option<String>) -> Reply {
    match value {
        Some(text) => Reply::Bulk(text),
        None => Reply::Null,
    }
}

fn bulk_array(values: Vec<String>) -> Reply {
    Reply::Array(values.into_iter().map(Reply::Bulk).collect())
}

fn bool_array(values: Vec<bool>) -> Reply {
    Reply::Array(values.into_iter().map(|b| Reply::Int(i64::from(b))).collect())
}

fn float_array(values: Vec<f64>) -> Reply {
    Reply::Array(
        values
            .into_iter()
            .map(|v| Reply::bulk(if v.is_nan() { "nan".to_string() } else { format_float(v) }))
            .collect(),
    )
}

fn nan_or(value: Option<f64>) -> String {
    value.map(format_float).unwrap_or_else(|| "nan".to_string())
}

fn scored_array(pairs: Vec<(String, f64)>, withscores: bool) -> Reply {
    if !withscores {
        return Reply::Array(pairs.into_iter().map(|(m, _)| Reply::Bulk(m)).collect());
    }
    let mut flat = Vec::with_capacity(pairs.len() * 2);
    for (member, score) in pairs {
        flat.push(Reply::Bulk(member));
        flat.push(Reply::bulk(format_float(score)));
    }
    Reply::Array(flat)
}

fn scan_reply(next: u64, items: Reply) -> Reply {
    Reply::Array(vec![Reply::bulk(next.to_string()), items])
}

fn entry_reply(entry: StreamEntry) -> Reply {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (name, value) in entry.fields {
        fields.push(Reply::bulk(name));
        fields.push(Reply::bulk(value));
    }
    Reply::Array(vec![
        Reply::bulk(entry.id.to_string()),
        Reply::Array(fields),
    ])
}

fn entries_array(entries: Vec<StreamEntry>) -> Reply {
    Reply::Array(entries.into_iter().map(entry_reply).collect())
}

fn info_pairs(pairs: Vec<(&str, Reply)>) -> Reply {
    let mut flat = Vec::with_capacity(pairs.len() * 2);
    for (name, value) in pairs {
        flat.push(Reply::bulk(name.to_string()));
        flat.push(value);
    }
    Reply::Array(flat)
}

fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn hex_decode(text: &str) -> CacheResult<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(CacheError::other("invalid chunk encoding"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| CacheError::other("invalid chunk encoding"))
        })
        .collect()
}

/// BITFIELD subcommand parser: `[OVERFLOW policy] GET/SET/INCRBY ...`
/// sequences, with the overflow modifier applying to later commands.
fn parse_bitfield(args: &[String]) -> CacheResult<Vec<BitfieldCmd>> {
    let mut cmds = Vec::new();
    let mut overflow = Overflow::Wrap;
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "OVERFLOW" => {
                let policy = args.get(idx + 1).ok_or(CacheError::Syntax)?;
                overflow = match policy.to_ascii_uppercase().as_str() {
                    "WRAP" => Overflow::Wrap,
                    "SAT" => Overflow::Sat,
                    "FAIL" => Overflow::Fail,
                    _ => return Err(CacheError::Syntax),
                };
                idx += 2;
            }
            "GET" => {
                let spec = FieldSpec::parse(
                    args.get(idx + 1).ok_or(CacheError::Syntax)?,
                    args.get(idx + 2).ok_or(CacheError::Syntax)?,
                )?;
                cmds.push(BitfieldCmd::Get { spec });
                idx += 3;
            }
            "SET" => {
                let spec = FieldSpec::parse(
                    args.get(idx + 1).ok_or(CacheError::Syntax)?,
                    args.get(idx + 2).ok_or(CacheError::Syntax)?,
                )?;
                let value = args
                    .get(idx + 3)
                    .ok_or(CacheError::Syntax)?
                    .parse()
                    .map_err(|_| CacheError::NotInteger)?;
                cmds.push(BitfieldCmd::Set {
                    spec,
                    value,
                    overflow,
                });
                idx += 4;
            }
            "INCRBY" => {
                let spec = FieldSpec::parse(
                    args.get(idx + 1).ok_or(CacheError::Syntax)?,
                    args.get(idx + 2).ok_or(CacheError::Syntax)?,
                )?;
                let delta = args
                    .get(idx + 3)
                    .ok_or(CacheError::Syntax)?
                    .parse()
                    .map_err(|_| CacheError::NotInteger)?;
                cmds.push(BitfieldCmd::IncrBy {
                    spec,
                    delta,
                    overflow,
                });
                idx += 4;
            }
            _ => return Err(CacheError::Syntax),
        }
    }
    Ok(cmds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> String {
        text.to_string()
    }

    fn run(db: &Db, session: SessionId, line: &[&str]) -> Reply {
        let args: Vec<String> = line[1..].iter().map(|a| s(a)).collect();
        db.execute(session, line[0], &args)
    }

    const S1: SessionId = SessionId(1);

    #[test]
    fn basic_string_flow() {
        let db = Db::new();
        assert_eq!(run(&db, S1, &["SET", "k", "v"]), Reply::ok());
        assert_eq!(run(&db, S1, &["get", "k"]), Reply::Bulk(s("v")));
        assert_eq!(run(&db, S1, &["GET", "missing"]), Reply::Null);
        assert_eq!(run(&db, S1, &["DEL", "k"]), Reply::Int(1));
    }

    #[test]
    fn set_nx_xx_options() {
        let db = Db::new();
        assert_eq!(run(&db, S1, &["SET", "k", "a", "NX"]), Reply::ok());
        assert_eq!(run(&db, S1, &["SET", "k", "b", "NX"]), Reply::Null);
        assert_eq!(run(&db, S1, &["SET", "k", "b", "XX"]), Reply::ok());
        assert_eq!(run(&db, S1, &["SET", "nope", "x", "XX"]), Reply::Null);
        assert!(run(&db, S1, &["SET", "k", "v", "NX", "XX"]).is_error());
    }

    #[test]
    fn arity_and_unknown_errors() {
        let db = Db::new();
        assert!(run(&db, S1, &["GET"]).is_error());
        match run(&db, S1, &["NOSUCHCMD", "x"]) {
            Reply::Error(text) => assert!(text.contains("unknown command")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn wrongtype_error_reaches_the_wire_shape() {
        let db = Db::new();
        run(&db, S1, &["LPUSH", "l", "x"]);
        match run(&db, S1, &["GET", "l"]) {
            Reply::Error(text) => assert!(text.starts_with("WRONGTYPE")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn transaction_queue_and_exec() {
        let db = Db::new();
        assert_eq!(run(&db, S1, &["MULTI"]), Reply::ok());
        assert_eq!(
            run(&db, S1, &["SET", "k", "1"]),
            Reply::Simple(s("QUEUED"))
        );
        assert_eq!(run(&db, S1, &["INCR", "k"]), Reply::Simple(s("QUEUED")));
        let replies = run(&db, S1, &["EXEC"]);
        assert_eq!(
            replies,
            Reply::Array(vec![Reply::ok(), Reply::Int(2)])
        );
        assert_eq!(run(&db, S1, &["GET", "k"]), Reply::Bulk(s("2")));
    }

    #[test]
    fn watch_abort_on_foreign_write() {
        let db = Db::new();
        let other = SessionId(2);
        run(&db, S1, &["SET", "k", "1"]);

        assert_eq!(run(&db, S1, &["WATCH", "k"]), Reply::ok());
        assert_eq!(run(&db, S1, &["MULTI"]), Reply::ok());
        run(&db, S1, &["INCR", "k"]);

        // Another session mutates the watched key.
        assert_eq!(run(&db, other, &["SET", "k", "10"]), Reply::ok());

        assert_eq!(run(&db, S1, &["EXEC"]), Reply::NullArray);
        assert_eq!(run(&db, S1, &["GET", "k"]), Reply::Bulk(s("10")));
    }

    #[test]
    fn exec_without_multi_fails() {
        let db = Db::new();
        match run(&db, S1, &["EXEC"]) {
            Reply::Error(text) => assert!(text.contains("EXEC without MULTI")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn errors_inside_exec_do_not_abort() {
        let db = Db::new();
        run(&db, S1, &["SET", "s", "notanumber"]);
        run(&db, S1, &["MULTI"]);
        run(&db, S1, &["INCR", "s"]);
        run(&db, S1, &["SET", "after", "ran"]);
        let replies = run(&db, S1, &["EXEC"]);

        match replies {
            Reply::Array(items) => {
                assert!(items[0].is_error());
                assert_eq!(items[1], Reply::ok());
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(run(&db, S1, &["GET", "after"]), Reply::Bulk(s("ran")));
    }

    #[test]
    fn zunionstore_scenario_from_the_wire() {
        let db = Db::new();
        run(&db, S1, &["ZADD", "a", "1", "x", "2", "y"]);
        run(&db, S1, &["ZADD", "b", "3", "y", "4", "z"]);
        assert_eq!(
            run(
                &db,
                S1,
                &["ZUNIONSTORE", "d", "2", "a", "b", "WEIGHTS", "2", "0.5"]
            ),
            Reply::Int(3)
        );

        assert_eq!(
            run(&db, S1, &["ZRANGE", "d", "0", "-1", "WITHSCORES"]),
            Reply::Array(vec![
                Reply::Bulk(s("x")),
                Reply::Bulk(s("2")),
                Reply::Bulk(s("z")),
                Reply::Bulk(s("2")),
                Reply::Bulk(s("y")),
                Reply::Bulk(s("5.5")),
            ])
        );
    }

    #[test]
    fn lrem_negative_count_scenario() {
        let db = Db::new();
        run(&db, S1, &["RPUSH", "L", "a", "b", "c", "a", "b", "a"]);
        assert_eq!(run(&db, S1, &["LREM", "L", "-2", "a"]), Reply::Int(2));
        assert_eq!(
            run(&db, S1, &["LRANGE", "L", "0", "-1"]),
            Reply::Array(vec![
                Reply::Bulk(s("a")),
                Reply::Bulk(s("b")),
                Reply::Bulk(s("c")),
                Reply::Bulk(s("b")),
            ])
        );
    }

    #[test]
    fn expiration_scenario() {
        let db = Db::new();
        run(&db, S1, &["SET", "k", "v"]);
        run(&db, S1, &["PEXPIRE", "k", "40"]);
        std::thread::sleep(Duration::from_millis(90));

        assert_eq!(run(&db, S1, &["GET", "k"]), Reply::Null);
        assert_eq!(run(&db, S1, &["EXISTS", "k"]), Reply::Int(0));
        assert_eq!(db.stat(crate::db::StatField::ExpiredKeys), 1);
    }

    #[test]
    fn geo_distance_scenario() {
        let db = Db::new();
        run(
            &db,
            S1,
            &["GEOADD", "g", "-122.4194", "37.7749", "sf", "-73.9857", "40.7484", "nyc"],
        );
        match run(&db, S1, &["GEODIST", "g", "sf", "nyc", "km"]) {
            Reply::Bulk(text) => {
                let km: f64 = text.parse().unwrap();
                assert!((km - 4129.0).abs() < 10.0, "distance {}", km);
            }
            other => panic!("expected bulk, got {:?}", other),
        }
    }

    #[test]
    fn bloom_dump_roundtrip_through_dispatch() {
        let db = Db::new();
        run(&db, S1, &["BF.RESERVE", "f", "0.01", "100"]);
        run(&db, S1, &["BF.ADD", "f", "present"]);

        let mut chunks = Vec::new();
        let mut iterator = s("0");
        loop {
            let reply = run(&db, S1, &["BF.SCANDUMP", "f", &iterator]);
            let Reply::Array(items) = reply else {
                panic!("expected array");
            };
            let Reply::Int(next) = items[0] else {
                panic!("expected int cursor");
            };
            if next == 0 {
                break;
            }
            let Reply::Bulk(chunk) = &items[1] else {
                panic!("expected bulk chunk");
            };
            chunks.push((next.to_string(), chunk.clone()));
            iterator = next.to_string();
        }

        run(&db, S1, &["DEL", "f"]);
        for (iter, chunk) in &chunks {
            assert_eq!(
                run(&db, S1, &["BF.LOADCHUNK", "f", iter, chunk]),
                Reply::ok()
            );
        }
        assert_eq!(run(&db, S1, &["BF.EXISTS", "f", "present"]), Reply::Int(1));
    }

    #[test]
    fn scan_match_pages() {
        let db = Db::new();
        for i in 0..5 {
            run(&db, S1, &["SET", &format!("user:{}", i), "x"]);
        }
        run(&db, S1, &["SET", "other", "x"]);

        let reply = run(&db, S1, &["SCAN", "0", "MATCH", "user:*", "COUNT", "100"]);
        match reply {
            Reply::Array(items) => {
                assert_eq!(items[0], Reply::Bulk(s("0")));
                match &items[1] {
                    Reply::Array(keys) => assert_eq!(keys.len(), 5),
                    other => panic!("expected array, got {:?}", other),
                }
            }
            other => panic!("expected array, got {:?}", other),
        }
    }
}

//! Directory listings over TRANS2 FIND_FIRST2 / FIND_NEXT2

use super::node::join;
use super::Share;
use crate::attributes::FileAttributes;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{find_flags, trans2, DosAttributes, SmbCommand};
use crate::protocol::messages::directory::decode_entry;
use crate::protocol::messages::{
    FindClose2Request, FindFirst2Params, FindLevel, FindNext2Params,
    FindResponseParams, SmbMessage,
};
use crate::transport::SmbRequest;
use tracing::{debug, warn};

/// One listed name with the metadata that came with it
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub attrs: FileAttributes,
}

/// State of one search between calls to [`Share::find_next`]
///
/// Release it with [`Share::find_close`]; the server keeps the search open until then.
#[derive(Debug)]
pub struct EnumerationContext {
    dir: String,
    pattern: String,
    level: FindLevel,
    attr_filter: DosAttributes,
    search_count: u16,
    single: bool,
    sid: Option<u16>,
    started: bool,
    end_of_search: bool,
    // the server closed the search itself
    no_close: bool,
    resume_key: u32,
    resume_name: Option<String>,
    name_captured: bool,
    buffer: Vec<u8>,
    offset: usize,
    remaining: u16,
    last_name_offset: usize,
    released: bool,
}

impl EnumerationContext {
    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn level(&self) -> FindLevel {
        self.level
    }

    pub fn search_count(&self) -> u16 {
        self.search_count
    }

    pub fn end_of_search(&self) -> bool {
        self.end_of_search
    }

    /// Name FIND_NEXT2 will resume after, if the last reply yielded one
    pub fn resume_name(&self) -> Option<&str> {
        self.resume_name.as_deref()
    }

    fn flags(&self) -> u16 {
        if self.single {
            find_flags::CLOSE_AFTER_REQUEST | find_flags::CLOSE_AT_EOS
        } else {
            find_flags::RETURN_RESUME_KEYS | find_flags::CLOSE_AT_EOS
        }
    }

    fn load_segment(&mut self, params: &FindResponseParams, data: Vec<u8>, status: NtStatus) {
        self.buffer = data;
        self.offset = 0;
        self.remaining = params.search_count;
        self.last_name_offset = params.last_name_offset as usize;
        self.name_captured = false;
        self.resume_name = None;

        let mut eos =
            params.end_of_search || params.search_count == 0 || status == NtStatus::NoMoreFiles;
        if params.search_count > 0 && self.buffer.is_empty() {
            warn!(
                "{}: find reply claims {} entries with no data, ending search",
                self.dir, params.search_count
            );
            self.remaining = 0;
            eos = true;
        }
        if eos {
            self.end_of_search = true;
            if params.end_of_search && self.flags() & find_flags::CLOSE_AT_EOS != 0 {
                self.no_close = true;
            }
        }
        debug!(
            "{}: segment of {} entries, end of search {}",
            self.dir, self.remaining, self.end_of_search
        );
    }
}

impl Drop for EnumerationContext {
    fn drop(&mut self) {
        if !self.released && !self.no_close && self.sid.is_some() {
            warn!("{}: search dropped without find_close", self.dir);
        }
    }
}

impl Share {
    /// Prepare a search of `dir`; nothing is sent until the first [`Share::find_next`]
    ///
    /// Without `wildcard` the pattern names one entry and the server is asked to
    /// close the search after answering.
    pub fn find_open(&self, dir: &str, pattern: &str, wildcard: bool) -> EnumerationContext {
        let caps = self.capabilities();
        let level = caps.find_level();
        let search_count = if wildcard {
            (caps.transmit_max as usize / level.min_entry_size()).clamp(1, u16::MAX as usize) as u16
        } else {
            1
        };
        EnumerationContext {
            dir: dir.to_string(),
            pattern: pattern.to_string(),
            level,
            attr_filter: DosAttributes::HIDDEN | DosAttributes::SYSTEM | DosAttributes::DIRECTORY,
            search_count,
            single: !wildcard,
            sid: None,
            started: false,
            end_of_search: false,
            no_close: false,
            resume_key: 0,
            resume_name: None,
            name_captured: false,
            buffer: Vec::new(),
            offset: 0,
            remaining: 0,
            last_name_offset: 0,
            released: false,
        }
    }

    /// Next entry of the listing, or `None` once the search is exhausted
    pub async fn find_next(&self, ctx: &mut EnumerationContext) -> Result<Option<DirEntry>> {
        loop {
            if ctx.remaining == 0 {
                if ctx.end_of_search {
                    return Ok(None);
                }
                if ctx.started {
                    self.find_next_segment(ctx).await?;
                } else {
                    self.find_first_segment(ctx).await?;
                }
                continue;
            }

            let (entry, span) = decode_entry(ctx.level, &ctx.buffer, ctx.offset)?;
            ctx.remaining -= 1;
            ctx.resume_key = entry.resume_key;
            if !ctx.name_captured && span.contains(ctx.last_name_offset) {
                ctx.resume_name = Some(entry.name.clone());
                ctx.name_captured = true;
            }
            match span.next {
                Some(next) => ctx.offset = next,
                None => {
                    if ctx.remaining > 0 {
                        warn!(
                            "{}: entry chain ended with {} entries unread",
                            ctx.dir, ctx.remaining
                        );
                        ctx.remaining = 0;
                    }
                }
            }

            if entry.name == "." || entry.name == ".." {
                continue;
            }
            return Ok(Some(DirEntry {
                name: entry.name,
                attrs: entry.attrs,
            }));
        }
    }

    async fn find_first_segment(&self, ctx: &mut EnumerationContext) -> Result<()> {
        ctx.started = true;
        let params = FindFirst2Params {
            search_attributes: ctx.attr_filter,
            search_count: ctx.search_count,
            flags: ctx.flags(),
            level: ctx.level.code(),
            storage_type: 0,
            pattern: join(&ctx.dir, &ctx.pattern),
        }
        .serialize()?;
        let reply = self.trans2(trans2::FIND_FIRST2, params, Vec::new()).await?;
        if reply.is_error() {
            ctx.end_of_search = true;
            return match Error::from_status(reply.status, &join(&ctx.dir, &ctx.pattern)) {
                Error::FileNotFound(_) if !ctx.single => Ok(()),
                e => Err(e),
            };
        }

        let params = FindResponseParams::parse_first(&reply.params)?;
        ctx.sid = params.sid;
        if ctx.single {
            ctx.no_close = true;
        }
        ctx.load_segment(&params, reply.data, reply.status);
        Ok(())
    }

    async fn find_next_segment(&self, ctx: &mut EnumerationContext) -> Result<()> {
        let sid = match ctx.sid {
            Some(sid) if !ctx.no_close => sid,
            _ => {
                ctx.end_of_search = true;
                return Ok(());
            }
        };
        let params = FindNext2Params {
            sid,
            search_count: ctx.search_count,
            level: ctx.level.code(),
            resume_key: ctx.resume_key,
            flags: ctx.flags(),
            resume_name: ctx.resume_name.clone().unwrap_or_default(),
        }
        .serialize()?;
        let reply = self.trans2(trans2::FIND_NEXT2, params, Vec::new()).await?;
        if reply.is_error() {
            ctx.end_of_search = true;
            return match Error::from_status(reply.status, &ctx.dir) {
                Error::FileNotFound(_) => Ok(()),
                e => Err(e),
            };
        }

        let params = FindResponseParams::parse_next(&reply.params)?;
        ctx.load_segment(&params, reply.data, reply.status);
        Ok(())
    }

    /// Release the search, closing it on the server unless the server already did
    pub async fn find_close(&self, mut ctx: EnumerationContext) -> Result<()> {
        ctx.released = true;
        ctx.buffer = Vec::new();
        let sid = match ctx.sid {
            Some(sid) if !ctx.no_close => sid,
            _ => return Ok(()),
        };
        let request = FindClose2Request { sid };
        match self
            .call(SmbRequest::new(SmbCommand::FindClose2, request.serialize()?))
            .await
        {
            Ok(reply) => reply.into_result("find close").map(|_| ()),
            Err(e) if e.is_transport() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Every entry of `dir` except `.` and `..`
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let mut ctx = self.find_open(dir, "*", true);
        let mut entries = Vec::new();
        let listed = loop {
            match self.find_next(&mut ctx).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.find_close(ctx).await;
        listed?;
        closed?;
        Ok(entries)
    }
}

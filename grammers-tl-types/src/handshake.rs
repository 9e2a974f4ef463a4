// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The handful of plaintext constructors exchanged during the
//! Diffie-Hellman key exchange. These are fixed wire shapes dictated by
//! the protocol itself rather than part of a generated schema, so they
//! are hand-curated here alongside the rest of the trimmed TL surface.
use crate::deserialize::{Cursor, Error, Result};
use crate::{Deserializable, Identifiable, RemoteCall, Serializable};

macro_rules! impl_identifiable {
    ($ty:ty, $id:expr) => {
        impl Identifiable for $ty {
            const CONSTRUCTOR_ID: u32 = $id;
        }
    };
}

/// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ;`
pub struct ReqPqMulti {
    pub nonce: [u8; 16],
}
impl_identifiable!(ReqPqMulti, 0xbe7e8ef1);
impl Serializable for ReqPqMulti {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
    }
}
impl RemoteCall for ReqPqMulti {
    type Return = ResPq;
    fn read_result(buf: &[u8]) -> Result<Self::Return> {
        ResPq::deserialize(&mut Cursor::from_slice(buf))
    }
}

/// `resPQ#05162463 nonce:int128 server_nonce:int128 pq:string
/// server_public_key_fingerprints:Vector<long> = ResPQ;`
pub struct ResPqData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub pq: Vec<u8>,
    pub server_public_key_fingerprints: Vec<i64>,
}
impl_identifiable!(ResPqData, 0x05162463);

pub enum ResPq {
    Pq(ResPqData),
}
impl Deserializable for ResPq {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        match id {
            x if x == ResPqData::CONSTRUCTOR_ID => Ok(ResPq::Pq(ResPqData {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                pq: Vec::<u8>::deserialize(buf)?,
                server_public_key_fingerprints: Vec::<i64>::deserialize(buf)?,
            })),
            _ => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `p_q_inner_data#83c95aec pq:string p:string q:string nonce:int128
/// server_nonce:int128 new_nonce:int256 = P_Q_inner_data;`
pub struct PQInnerDataPlain {
    pub pq: Vec<u8>,
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce: [u8; 32],
}
impl_identifiable!(PQInnerDataPlain, 0x83c95aec);

pub enum PQInnerData {
    Data(PQInnerDataPlain),
}
impl Serializable for PQInnerData {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            PQInnerData::Data(d) => {
                PQInnerDataPlain::CONSTRUCTOR_ID.serialize(buf);
                d.pq.serialize(buf);
                d.p.serialize(buf);
                d.q.serialize(buf);
                d.nonce.serialize(buf);
                d.server_nonce.serialize(buf);
                d.new_nonce.serialize(buf);
            }
        }
    }
}

/// `req_DH_params#d712e4be nonce:int128 server_nonce:int128 p:string
/// q:string public_key_fingerprint:long encrypted_data:string = Server_DH_Params;`
pub struct ReqDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub public_key_fingerprint: i64,
    pub encrypted_data: Vec<u8>,
}
impl_identifiable!(ReqDhParams, 0xd712e4be);
impl Serializable for ReqDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.p.serialize(buf);
        self.q.serialize(buf);
        self.public_key_fingerprint.serialize(buf);
        self.encrypted_data.serialize(buf);
    }
}
impl RemoteCall for ReqDhParams {
    type Return = ServerDhParams;
    fn read_result(buf: &[u8]) -> Result<Self::Return> {
        ServerDhParams::deserialize(&mut Cursor::from_slice(buf))
    }
}

pub struct ServerDhParamsFailData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash: [u8; 16],
}
impl_identifiable!(ServerDhParamsFailData, 0x79cb045d);

pub struct ServerDhParamsOkData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_answer: Vec<u8>,
}
impl_identifiable!(ServerDhParamsOkData, 0xd0e8075c);

/// `server_DH_params_fail#79cb045d ... = Server_DH_Params;`
/// `server_DH_params_ok#d0e8075c ... = Server_DH_Params;`
pub enum ServerDhParams {
    Fail(ServerDhParamsFailData),
    Ok(ServerDhParamsOkData),
}
impl Deserializable for ServerDhParams {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        match id {
            x if x == ServerDhParamsFailData::CONSTRUCTOR_ID => {
                Ok(ServerDhParams::Fail(ServerDhParamsFailData {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    new_nonce_hash: <[u8; 16]>::deserialize(buf)?,
                }))
            }
            x if x == ServerDhParamsOkData::CONSTRUCTOR_ID => {
                Ok(ServerDhParams::Ok(ServerDhParamsOkData {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    encrypted_answer: Vec::<u8>::deserialize(buf)?,
                }))
            }
            _ => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `server_DH_inner_data#b5890dba nonce:int128 server_nonce:int128 g:int
/// dh_prime:string g_a:string server_time:int = Server_DH_inner_data;`
pub struct ServerDhInnerDataPlain {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub g: i32,
    pub dh_prime: Vec<u8>,
    pub g_a: Vec<u8>,
    pub server_time: i32,
}
impl_identifiable!(ServerDhInnerDataPlain, 0xb5890dba);

pub enum ServerDhInnerData {
    Data(ServerDhInnerDataPlain),
}
impl Deserializable for ServerDhInnerData {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        match id {
            x if x == ServerDhInnerDataPlain::CONSTRUCTOR_ID => {
                Ok(ServerDhInnerData::Data(ServerDhInnerDataPlain {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    g: i32::deserialize(buf)?,
                    dh_prime: Vec::<u8>::deserialize(buf)?,
                    g_a: Vec::<u8>::deserialize(buf)?,
                    server_time: i32::deserialize(buf)?,
                }))
            }
            _ => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// `client_DH_inner_data#6643b654 nonce:int128 server_nonce:int128
/// retry_id:long g_b:string = Client_DH_Inner_Data;`
pub struct ClientDhInnerDataPlain {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub retry_id: i64,
    pub g_b: Vec<u8>,
}
impl_identifiable!(ClientDhInnerDataPlain, 0x6643b654);

pub enum ClientDhInnerData {
    Data(ClientDhInnerDataPlain),
}
impl Serializable for ClientDhInnerData {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            ClientDhInnerData::Data(d) => {
                ClientDhInnerDataPlain::CONSTRUCTOR_ID.serialize(buf);
                d.nonce.serialize(buf);
                d.server_nonce.serialize(buf);
                d.retry_id.serialize(buf);
                d.g_b.serialize(buf);
            }
        }
    }
}

/// `set_client_DH_params#f5045f1f nonce:int128 server_nonce:int128
/// encrypted_data:string = Set_client_DH_params_answer;`
pub struct SetClientDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_data: Vec<u8>,
}
impl_identifiable!(SetClientDhParams, 0xf5045f1f);
impl Serializable for SetClientDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.encrypted_data.serialize(buf);
    }
}
impl RemoteCall for SetClientDhParams {
    type Return = SetClientDhParamsAnswer;
    fn read_result(buf: &[u8]) -> Result<Self::Return> {
        SetClientDhParamsAnswer::deserialize(&mut Cursor::from_slice(buf))
    }
}

pub struct DhGenOkData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash1: [u8; 16],
}
impl_identifiable!(DhGenOkData, 0x3bcbf734);

pub struct DhGenRetryData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash2: [u8; 16],
}
impl_identifiable!(DhGenRetryData, 0x46dc1fb9);

pub struct DhGenFailData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub new_nonce_hash3: [u8; 16],
}
impl_identifiable!(DhGenFailData, 0xa69dae02);

/// `dh_gen_ok#3bcbf734 ... = Set_client_DH_params_answer;`
/// `dh_gen_retry#46dc1fb9 ... = Set_client_DH_params_answer;`
/// `dh_gen_fail#a69dae02 ... = Set_client_DH_params_answer;`
pub enum SetClientDhParamsAnswer {
    DhGenOk(DhGenOkData),
    DhGenRetry(DhGenRetryData),
    DhGenFail(DhGenFailData),
}
impl Deserializable for SetClientDhParamsAnswer {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        match id {
            x if x == DhGenOkData::CONSTRUCTOR_ID => {
                Ok(SetClientDhParamsAnswer::DhGenOk(DhGenOkData {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    new_nonce_hash1: <[u8; 16]>::deserialize(buf)?,
                }))
            }
            x if x == DhGenRetryData::CONSTRUCTOR_ID => {
                Ok(SetClientDhParamsAnswer::DhGenRetry(DhGenRetryData {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    new_nonce_hash2: <[u8; 16]>::deserialize(buf)?,
                }))
            }
            x if x == DhGenFailData::CONSTRUCTOR_ID => {
                Ok(SetClientDhParamsAnswer::DhGenFail(DhGenFailData {
                    nonce: <[u8; 16]>::deserialize(buf)?,
                    server_nonce: <[u8; 16]>::deserialize(buf)?,
                    new_nonce_hash3: <[u8; 16]>::deserialize(buf)?,
                }))
            }
            _ => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

// Wire encodings of the message parameters other actors and clients construct.
mod serialization {
    use fil_actor_miner::{
        ChangeWorkerAddressParams, CronEventPayload, ExtendSectorExpirationParams,
        WithdrawBalanceParams, CRON_EVENT_PROVING_PERIOD,
    };
    use fvm_ipld_encoding::ipld_block::IpldBlock;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use hex_literal::hex;

    #[test]
    fn cron_event_payload() {
        let payload = CronEventPayload { event_type: CRON_EVENT_PROVING_PERIOD, sectors: None };
        // [2,null]
        let encoded = IpldBlock::serialize_cbor(&payload).unwrap().unwrap();
        assert_eq!(hex!("8202f6").to_vec(), encoded.data);
        let decoded: CronEventPayload = IpldBlock::deserialize(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn withdraw_balance_params() {
        let params = WithdrawBalanceParams { amount_requested: TokenAmount::from_atto(1) };
        // [byte[0001]]
        let encoded = IpldBlock::serialize_cbor(&params).unwrap().unwrap();
        assert_eq!(hex!("81420001").to_vec(), encoded.data);
    }

    #[test]
    fn change_worker_address_params() {
        let params = ChangeWorkerAddressParams { new_worker: Address::new_id(101) };
        // [byte[0065]]
        let encoded = IpldBlock::serialize_cbor(&params).unwrap().unwrap();
        assert_eq!(hex!("81420065").to_vec(), encoded.data);
    }

    #[test]
    fn extend_sector_expiration_params() {
        let params = ExtendSectorExpirationParams { sector_number: 1, new_expiration: 5759 };
        // [1,5759]
        let encoded = IpldBlock::serialize_cbor(&params).unwrap().unwrap();
        assert_eq!(hex!("820119167f").to_vec(), encoded.data);
    }
}

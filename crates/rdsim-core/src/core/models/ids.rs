use slotmap::new_key_type;

new_key_type! {
    pub struct SpeciesId;
    pub struct SurfaceClassId;
    pub struct GeometryId;
    pub struct ReactionRuleId;
    pub struct ReleaseSiteId;
    pub struct ObservableId;
    pub struct ListenerId;
}
